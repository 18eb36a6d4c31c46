use std::collections::VecDeque;

use datafusion::arrow::array::ArrayRef;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use models::{Bounds, CursorStats};
use snafu::ResultExt;
use tracing::warn;

use super::TableSource;
use crate::cursor::{ArrayCursorPtr, CursorValue, ValueArray};
use crate::error::{self, GroupCursorError, Result};
use crate::store::GroupCursorPtr;
use crate::tags_cache::TagsCacheRef;

/// Rows of every series of one partition: `_start, _stop, _value, group keys...`.
///
/// Owns the group cursor and all series cursors of the partition; they are read
/// one after another.
pub(crate) struct GroupSource<T: CursorValue> {
    group_cursor: Option<GroupCursorPtr>,
    cursors: VecDeque<ArrayCursorPtr<T>>,
    bounds: Bounds,
    key_values: Vec<String>,
    cache: TagsCacheRef,
    pending: Option<ValueArray<T>>,
    empty: bool,
    // 已关闭 cursor 的统计
    stats: CursorStats,
}

impl<T: CursorValue> GroupSource<T> {
    /// Collects the remaining series cursors of `group_cursor` behind `first`.
    ///
    /// Every cursor must be of the same kind as `first`, otherwise all of them
    /// and the group cursor are closed and a [`GroupCursorError`] is returned.
    pub(crate) async fn collect(
        first: ArrayCursorPtr<T>,
        mut group_cursor: GroupCursorPtr,
        bounds: Bounds,
        key_values: Vec<String>,
        cache: TagsCacheRef,
    ) -> Result<Self> {
        let mut cursors = VecDeque::from([first]);
        while group_cursor.next().await {
            let cursor = match group_cursor.cursor() {
                Some(c) => c,
                None => continue,
            };
            match T::from_cursor(cursor) {
                Ok(c) => cursors.push_back(c),
                Err(mut other) => {
                    let err = GroupCursorError {
                        expected: T::VALUE_TYPE,
                        got: other.value_type(),
                    };
                    warn!("{}, group {:?} is dropped", err, key_values);
                    other.close();
                    for mut c in cursors {
                        c.close();
                    }
                    group_cursor.close();
                    return Err(err.into());
                }
            }
        }

        Ok(Self {
            group_cursor: Some(group_cursor),
            cursors,
            bounds,
            key_values,
            cache,
            pending: None,
            empty: true,
            stats: CursorStats::default(),
        })
    }

    async fn next_block(&mut self) -> Result<ValueArray<T>> {
        if let Some(block) = self.pending.take() {
            return Ok(block);
        }
        while let Some(cursor) = self.cursors.front_mut() {
            let block = cursor.next().await?;
            if !block.is_empty() {
                return Ok(block);
            }
            if let Some(mut cursor) = self.cursors.pop_front() {
                self.stats += cursor.stats();
                cursor.close();
            }
        }
        Ok(ValueArray::empty())
    }
}

#[async_trait::async_trait]
impl<T: CursorValue> TableSource for GroupSource<T> {
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
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(3 + self.key_values.len());
        {
            let mut cache = self.cache.lock();
            let (start, stop) = cache.get_bounds(self.bounds, len);
            columns.push(start);
            columns.push(stop);
            columns.push(T::into_array(block.values));
            for value in self.key_values.iter() {
                columns.push(cache.get_tag(value, len));
            }
        }

        RecordBatch::try_new(schema.clone(), columns)
            .map(Some)
            .context(error::ArrowSnafu)
    }

    fn stats(&self) -> CursorStats {
        let mut stats = self.stats;
        for cursor in self.cursors.iter() {
            stats += cursor.stats();
        }
        stats
    }

    fn close(&mut self) {
        while let Some(mut cursor) = self.cursors.pop_front() {
            self.stats += cursor.stats();
            cursor.close();
        }
        if let Some(mut gc) = self.group_cursor.take() {
            gc.close();
        }
    }
}
