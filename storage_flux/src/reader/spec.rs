use std::str::FromStr;

use models::{Bounds, Predicate};

use crate::error::{Error, Result};

/// Where and what to read: bucket, time range and an optional predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFilterSpec {
    pub organization_id: u64,
    pub bucket_id: u64,
    pub bounds: Bounds,
    pub predicate: Option<Predicate>,
}

impl ReadFilterSpec {
    pub fn new(organization_id: u64, bucket_id: u64, bounds: Bounds) -> Self {
        Self {
            organization_id,
            bucket_id,
            bounds,
            predicate: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupMode {
    /// Every series lands in the same group.
    #[default]
    None,
    /// One group per distinct combination of the group keys.
    By,
}

impl FromStr for GroupMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "by" => Ok(Self::By),
            _ => Err(Error::UnknownGroupMode {
                mode: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadGroupSpec {
    pub read_filter_spec: ReadFilterSpec,
    pub group_mode: GroupMode,
    pub group_keys: Vec<String>,
    /// Name of the aggregate pushed down to storage, empty for none.
    pub aggregate_method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadWindowAggregateSpec {
    pub read_filter_spec: ReadFilterSpec,
    /// Window length in nanoseconds.
    pub window_every: i64,
    pub aggregates: Vec<String>,
    pub create_empty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadTagKeysSpec {
    pub read_filter_spec: ReadFilterSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadTagValuesSpec {
    pub read_filter_spec: ReadFilterSpec,
    pub tag_key: String,
}
