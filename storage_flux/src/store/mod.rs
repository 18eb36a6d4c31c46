use std::collections::HashSet;
use std::sync::Arc;

use models::{Tags, Timestamp};

pub use self::request::{
    Aggregate, AggregateType, ReadFilterRequest, ReadGroup, ReadGroupRequest, ReadSource,
    ReadWindowAggregateRequest, TagKeysRequest, TagValuesRequest, TimestampRange,
};
use crate::cursor::Cursor;
use crate::error::{Error, Result};

mod request;

pub type StoreRef = Arc<dyn Store>;
pub type ResultSetPtr = Box<dyn ResultSet>;
pub type GroupResultSetPtr = Box<dyn GroupResultSet>;
pub type GroupCursorPtr = Box<dyn GroupCursor>;
pub type StringIteratorPtr = Box<dyn StringIterator>;

/// Sequential producer of `(tags, cursor)` pairs, one per series/field.
#[async_trait::async_trait]
pub trait ResultSet: Send {
    /// Moves to the next series, `false` once exhausted or failed, see [`ResultSet::err`].
    async fn next(&mut self) -> bool;

    /// Takes the cursor of the current series, `None` if it has no data for the field.
    fn cursor(&mut self) -> Option<Cursor>;

    fn tags(&self) -> &Tags;

    fn close(&mut self);

    /// The error that stopped iteration, if any.
    fn err(&mut self) -> Result<()>;
}

/// Producer of partitions for grouped reads.
#[async_trait::async_trait]
pub trait GroupResultSet: Send {
    async fn next(&mut self) -> Option<GroupCursorPtr>;

    fn close(&mut self);

    fn err(&mut self) -> Result<()>;
}

/// Series of one partition, all sharing the same partition key.
#[async_trait::async_trait]
pub trait GroupCursor: Send {
    async fn next(&mut self) -> bool;

    fn cursor(&mut self) -> Option<Cursor>;

    /// Partition key values, aligned with the group keys of the request.
    fn partition_key_vals(&self) -> &[Vec<u8>];

    fn close(&mut self);
}

#[async_trait::async_trait]
pub trait StringIterator: Send {
    async fn next(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Aggregates a backend can compute itself when reading groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupCapability {
    aggregates: HashSet<AggregateType>,
}

impl GroupCapability {
    pub fn new(aggregates: impl IntoIterator<Item = AggregateType>) -> Self {
        Self {
            aggregates: aggregates.into_iter().collect(),
        }
    }

    pub fn supports(&self, agg: AggregateType) -> bool {
        self.aggregates.contains(&agg)
    }

    pub fn have_count(&self) -> bool {
        self.supports(AggregateType::Count)
    }

    pub fn have_sum(&self) -> bool {
        self.supports(AggregateType::Sum)
    }

    pub fn have_first(&self) -> bool {
        self.supports(AggregateType::First)
    }

    pub fn have_last(&self) -> bool {
        self.supports(AggregateType::Last)
    }
}

/// Aggregates a backend can compute itself per window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowAggregateCapability {
    aggregates: HashSet<AggregateType>,
}

impl WindowAggregateCapability {
    pub fn new(aggregates: impl IntoIterator<Item = AggregateType>) -> Self {
        Self {
            aggregates: aggregates.into_iter().collect(),
        }
    }

    pub fn supports(&self, agg: AggregateType) -> bool {
        self.aggregates.contains(&agg)
    }

    pub fn have_min(&self) -> bool {
        self.supports(AggregateType::Min)
    }

    pub fn have_max(&self) -> bool {
        self.supports(AggregateType::Max)
    }

    pub fn have_mean(&self) -> bool {
        self.supports(AggregateType::Mean)
    }

    pub fn have_count(&self) -> bool {
        self.supports(AggregateType::Count)
    }

    pub fn have_sum(&self) -> bool {
        self.supports(AggregateType::Sum)
    }
}

/// Optional push-down support a backend declares when it is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub group: Option<GroupCapability>,
    pub window_aggregate: Option<WindowAggregateCapability>,
}

// 存储引擎在读取层的边界
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    fn get_source(&self, org_id: u64, bucket_id: u64) -> ReadSource {
        ReadSource::new(org_id, bucket_id)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    /// `Ok(None)` when there is nothing to read.
    async fn read_filter(&self, req: ReadFilterRequest) -> Result<Option<ResultSetPtr>>;

    async fn read_group(&self, req: ReadGroupRequest) -> Result<Option<GroupResultSetPtr>>;

    async fn window_aggregate(
        &self,
        _req: ReadWindowAggregateRequest,
    ) -> Result<Option<ResultSetPtr>> {
        Err(Error::WindowAggregateUnsupported)
    }

    async fn tag_keys(&self, req: TagKeysRequest) -> Result<StringIteratorPtr>;

    async fn tag_values(&self, req: TagValuesRequest) -> Result<StringIteratorPtr>;
}

impl From<models::Bounds> for TimestampRange {
    fn from(bounds: models::Bounds) -> Self {
        Self {
            start: bounds.start,
            end: bounds.stop,
        }
    }
}

impl TimestampRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }
}
