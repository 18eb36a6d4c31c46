use std::fmt::Display;
use std::ops::AddAssign;

use datafusion::arrow::datatypes::DataType as ArrowDataType;
use serde::{Deserialize, Serialize};

pub use crate::predicate::{ComparisonOp, LogicalOp, Node, Predicate};
pub use crate::tag::{Tag, TagKey, TagValue, Tags, FIELD_KEY_TAG_KEY, MEASUREMENT_TAG_KEY};

pub mod predicate;
pub mod tag;

/// Nanoseconds since the unix epoch.
pub type Timestamp = i64;

// 存储引擎中一个 field 的物理类型, 一个 cursor 只会产生其中一种
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Float,
    Integer,
    Unsigned,
    Boolean,
    String,
}

impl ValueType {
    pub fn to_arrow_type(&self) -> ArrowDataType {
        match self {
            Self::Float => ArrowDataType::Float64,
            Self::Integer => ArrowDataType::Int64,
            Self::Unsigned => ArrowDataType::UInt64,
            Self::Boolean => ArrowDataType::Boolean,
            Self::String => ArrowDataType::Utf8,
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Integer => write!(f, "integer"),
            Self::Unsigned => write!(f, "unsigned"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
        }
    }
}

/// Half-open time interval `[start, stop)` of a read.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    pub start: Timestamp,
    pub stop: Timestamp,
}

impl Bounds {
    pub fn new(start: Timestamp, stop: Timestamp) -> Self {
        Self { start, stop }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }
}

impl Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

// 扫描了多少数据 由 cursor 上报
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CursorStats {
    pub scanned_values: u64,
    pub scanned_bytes: u64,
}

impl CursorStats {
    pub fn new(scanned_values: u64, scanned_bytes: u64) -> Self {
        Self {
            scanned_values,
            scanned_bytes,
        }
    }

    pub fn add(&mut self, other: &CursorStats) {
        self.scanned_values += other.scanned_values;
        self.scanned_bytes += other.scanned_bytes;
    }
}

impl AddAssign for CursorStats {
    fn add_assign(&mut self, rhs: Self) {
        self.add(&rhs);
    }
}
