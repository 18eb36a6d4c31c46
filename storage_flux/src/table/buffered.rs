use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use models::CursorStats;

use super::{GroupKey, Release, Table, TableDone};
use crate::error::Result;

/// A table over one record batch that is already in memory.
pub struct BufferedTable {
    key: GroupKey,
    schema: SchemaRef,
    batch: Option<RecordBatch>,
    empty: bool,
    done: TableDone,
}

impl BufferedTable {
    pub fn new(key: GroupKey, batch: RecordBatch, done: TableDone) -> Self {
        Self {
            key,
            schema: batch.schema(),
            empty: batch.num_rows() == 0,
            batch: Some(batch),
            done,
        }
    }
}

#[async_trait::async_trait]
impl Table for BufferedTable {
    fn key(&self) -> &GroupKey {
        &self.key
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn is_empty(&self) -> bool {
        self.empty
    }

    async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.done.is_cancelled() {
            self.batch = None;
        }
        match self.batch.take() {
            Some(batch) => Ok(Some(batch)),
            None => {
                self.done.finish(Release::Drained(CursorStats::default()));
                Ok(None)
            }
        }
    }

    fn statistics(&self) -> CursorStats {
        CursorStats::default()
    }
}

impl Drop for BufferedTable {
    fn drop(&mut self) {
        self.done.finish(Release::Drained(CursorStats::default()));
    }
}
