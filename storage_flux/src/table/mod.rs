use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;

use datafusion::arrow::array::Array;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::execution::memory_pool::{MemoryConsumer, MemoryPool, MemoryReservation};
use datafusion::scalar::ScalarValue;
use futures::Stream;
use models::{CursorStats, Timestamp};
use snafu::ResultExt;

pub use self::buffered::BufferedTable;
pub use self::columns::ColMeta;
pub use self::handoff::{handoff, Ack, Release, TableDone, TableWaiter};
use crate::error::{self, Error, Result};

mod buffered;
pub mod columns;
pub(crate) mod group;
pub mod handoff;
pub(crate) mod series;
pub(crate) mod window;

pub type TableRef = Box<dyn Table>;
pub type SendableTableStream = Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>>;

/// One group's rows, streamed as arrow record batches.
///
/// Dropping a table releases its cursors, whether or not it was drained.
#[async_trait::async_trait]
pub trait Table: Send {
    fn key(&self) -> &GroupKey;

    fn schema(&self) -> SchemaRef;

    fn is_empty(&self) -> bool;

    /// `Ok(None)` once every row was produced or the read was cancelled.
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>>;

    fn statistics(&self) -> CursorStats;
}

pub fn into_stream(table: TableRef) -> SendableTableStream {
    Box::pin(futures::stream::try_unfold(table, |mut table| async move {
        let batch = table.next_batch().await?;
        Ok::<_, Error>(batch.map(|b| (b, table)))
    }))
}

/// Ordered columns and values identifying the partition a table belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey {
    cols: Vec<ColMeta>,
    values: Vec<ScalarValue>,
}

impl GroupKey {
    pub fn new(cols: Vec<ColMeta>, values: Vec<ScalarValue>) -> Self {
        debug_assert_eq!(cols.len(), values.len());
        Self { cols, values }
    }

    pub fn empty() -> Self {
        Self {
            cols: vec![],
            values: vec![],
        }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn value_of(&self, label: &str) -> Option<&ScalarValue> {
        self.cols
            .iter()
            .position(|c| c.label == label)
            .map(|i| &self.values[i])
    }

    /// Same key with `_start`/`_stop` set to the given window.
    pub fn with_bounds(&self, start: Timestamp, stop: Timestamp) -> Self {
        let mut key = self.clone();
        for (col, value) in key.cols.iter().zip(key.values.iter_mut()) {
            if col.label == columns::DEFAULT_START_COL_LABEL {
                *value = ScalarValue::TimestampNanosecond(Some(start), None);
            } else if col.label == columns::DEFAULT_STOP_COL_LABEL {
                *value = ScalarValue::TimestampNanosecond(Some(stop), None);
            }
        }
        key
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (col, value)) in self.cols.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", col.label, value)?;
        }
        write!(f, "}}")
    }
}

/// Cursor-backed row producer driven by a [`CursorTable`].
#[async_trait::async_trait]
pub(crate) trait TableSource: Send {
    /// Reads ahead until it is known whether the table has rows.
    async fn init(&mut self) -> Result<()>;

    fn is_empty(&self) -> bool;

    async fn read(&mut self, schema: &SchemaRef) -> Result<Option<RecordBatch>>;

    fn stats(&self) -> CursorStats;

    /// Closes every cursor the source owns, called exactly once.
    fn close(&mut self);
}

pub(crate) struct CursorTable<S: TableSource> {
    key: GroupKey,
    schema: SchemaRef,
    source: S,
    done: TableDone,
    reservation: MemoryReservation,
    closed: bool,
}

impl<S: TableSource> CursorTable<S> {
    /// Builds the table and reads its first block.
    ///
    /// On error the source is closed before returning.
    pub(crate) async fn try_new(
        key: GroupKey,
        schema: SchemaRef,
        source: S,
        done: TableDone,
        pool: &Arc<dyn MemoryPool>,
    ) -> Result<Self> {
        let reservation = MemoryConsumer::new(format!("StorageTable{}", key)).register(pool);
        let mut table = Self {
            key,
            schema,
            source,
            done,
            reservation,
            closed: false,
        };
        table.source.init().await?;
        Ok(table)
    }

    fn reserve(&mut self, batch: &RecordBatch) -> Result<()> {
        let size = batch
            .columns()
            .iter()
            .map(|c| c.get_array_memory_size())
            .sum::<usize>();
        // 只记录在途的一个 batch
        self.reservation.free();
        self.reservation
            .try_grow(size)
            .context(error::MemoryExhaustedSnafu)
    }

    fn release(&mut self, failure: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.close();
        self.reservation.free();
        let release = match failure {
            Some(reason) => Release::Aborted { reason },
            None => Release::Drained(self.source.stats()),
        };
        self.done.finish(release);
    }
}

#[async_trait::async_trait]
impl<S: TableSource> Table for CursorTable<S> {
    fn key(&self) -> &GroupKey {
        &self.key
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.closed {
            return Ok(None);
        }
        if self.done.is_cancelled() {
            self.release(None);
            return Ok(None);
        }

        let res = match self.source.read(&self.schema).await {
            Ok(Some(batch)) => self.reserve(&batch).map(|_| Some(batch)),
            other => other,
        };
        match res {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.release(None);
                Ok(None)
            }
            Err(e) => {
                self.release(Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn statistics(&self) -> CursorStats {
        self.source.stats()
    }
}

impl<S: TableSource> Drop for CursorTable<S> {
    fn drop(&mut self) {
        self.release(None);
    }
}
