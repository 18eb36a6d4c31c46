use std::fmt::Display;
use std::str::FromStr;

use bytes::Bytes;
use models::{Predicate, Timestamp};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{self, Error, Result};

/// Identity of the bucket a request reads from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSource {
    pub org_id: u64,
    pub bucket_id: u64,
}

impl ReadSource {
    pub fn new(org_id: u64, bucket_id: u64) -> Self {
        Self { org_id, bucket_id }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let buf = bincode::serialize(self).context(error::EncodeReadSourceSnafu)?;
        Ok(Bytes::from(buf))
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        bincode::deserialize(buf).context(error::DecodeReadSourceSnafu)
    }
}

/// `[start, end)` in nanoseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateType {
    None,
    Sum,
    Count,
    Min,
    Max,
    First,
    Last,
    Mean,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::Mean => "mean",
        }
    }
}

impl Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = Error;

    // 忽略大小写; 空串代表不聚合
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::None);
        }
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "SUM" => Ok(Self::Sum),
            "COUNT" => Ok(Self::Count),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "FIRST" => Ok(Self::First),
            "LAST" => Ok(Self::Last),
            "MEAN" => Ok(Self::Mean),
            _ => Err(Error::UnknownAggregateType { name: s.to_string() }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub agg_type: AggregateType,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadGroup {
    /// Merge all series into a single group.
    None,
    /// One group per distinct value of the group keys.
    By,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadFilterRequest {
    pub read_source: Bytes,
    pub predicate: Option<Predicate>,
    pub range: TimestampRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadGroupRequest {
    pub read_source: Bytes,
    pub predicate: Option<Predicate>,
    pub range: TimestampRange,
    pub group: ReadGroup,
    pub group_keys: Vec<String>,
    pub aggregate: Option<Aggregate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadWindowAggregateRequest {
    pub read_source: Bytes,
    pub predicate: Option<Predicate>,
    pub range: TimestampRange,
    pub window_every: i64,
    pub aggregate: Vec<Aggregate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagKeysRequest {
    pub tags_source: Bytes,
    pub predicate: Option<Predicate>,
    pub range: TimestampRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagValuesRequest {
    pub tags_source: Bytes,
    pub predicate: Option<Predicate>,
    pub range: TimestampRange,
    pub tag_key: Vec<u8>,
}
