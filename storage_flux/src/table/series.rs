use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, TimestampNanosecondArray};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use models::{Bounds, CursorStats, Tags};
use snafu::ResultExt;

use super::TableSource;
use crate::cursor::{ArrayCursorPtr, CursorValue, ValueArray};
use crate::error::{self, Result};
use crate::tags_cache::TagsCacheRef;

/// Rows of one series: `_start, _stop, _time, _value, tags...`.
pub(crate) struct SeriesSource<T: CursorValue> {
    cursor: Option<ArrayCursorPtr<T>>,
    bounds: Bounds,
    tags: Tags,
    cache: TagsCacheRef,
    pending: Option<ValueArray<T>>,
    empty: bool,
    stats: CursorStats,
}

impl<T: CursorValue> SeriesSource<T> {
    pub(crate) fn new(
        cursor: ArrayCursorPtr<T>,
        bounds: Bounds,
        tags: Tags,
        cache: TagsCacheRef,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            bounds,
            tags,
            cache,
            pending: None,
            empty: true,
            stats: CursorStats::default(),
        }
    }

    async fn next_block(&mut self) -> Result<ValueArray<T>> {
        if let Some(block) = self.pending.take() {
            return Ok(block);
        }
        match self.cursor.as_mut() {
            Some(cursor) => cursor.next().await,
            None => Ok(ValueArray::empty()),
        }
    }
}

#[async_trait::async_trait]
impl<T: CursorValue> TableSource for SeriesSource<T> {
    async fn init(&mut self) -> Result<()> {
        let block = self.next_block().await?;
        self.empty = block.is_empty();
        if !self.empty {
            self.pending = Some(block);
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.empty
    }

    async fn read(&mut self, schema: &SchemaRef) -> Result<Option<RecordBatch>> {
        let block = self.next_block().await?;
        if block.is_empty() {
            return Ok(None);
        }

        let len = block.len();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(4 + self.tags.len());
        {
            let mut cache = self.cache.lock();
            let (start, stop) = cache.get_bounds(self.bounds, len);
            columns.push(start);
            columns.push(stop);
            columns.push(Arc::new(TimestampNanosecondArray::from(block.timestamps)));
            columns.push(T::into_array(block.values));
            for tag in self.tags.iter() {
                columns.push(cache.get_tag(&tag.value_str(), len));
            }
        }

        RecordBatch::try_new(schema.clone(), columns)
            .map(Some)
            .context(error::ArrowSnafu)
    }

    fn stats(&self) -> CursorStats {
        match &self.cursor {
            Some(cursor) => cursor.stats(),
            None => self.stats,
        }
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            self.stats = cursor.stats();
            cursor.close();
        }
    }
}
