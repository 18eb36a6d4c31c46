use models::{CursorStats, Tags};
use tracing::debug;

use super::{close_result_set, deliver, ReadContext, ReadFilterSpec, TableConsumer, TableIterator};
use crate::cursor::{with_typed_cursor, ArrayCursorPtr, CursorValue};
use crate::error::Result;
use crate::store::{ReadFilterRequest, ResultSetPtr, StoreRef};
use crate::table::columns::{
    default_group_key_for_series, determine_table_cols_for_series, LayoutKey, TableMode,
};
use crate::table::series::SeriesSource;
use crate::table::{handoff, CursorTable, TableDone, TableRef};
use crate::tags_cache::TagsCacheRef;

/// One table per series, with every sample of the series in the read bounds.
pub struct FilterIterator {
    store: StoreRef,
    ctx: ReadContext,
    spec: ReadFilterSpec,
    cache: TagsCacheRef,
    stats: CursorStats,
}

impl FilterIterator {
    pub(crate) fn new(
        store: StoreRef,
        ctx: ReadContext,
        spec: ReadFilterSpec,
        cache: TagsCacheRef,
    ) -> Self {
        Self {
            store,
            ctx,
            spec,
            cache,
            stats: CursorStats::default(),
        }
    }

    async fn read(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        let src = self
            .store
            .get_source(self.spec.organization_id, self.spec.bucket_id);
        let req = ReadFilterRequest {
            read_source: src.encode()?,
            predicate: self.spec.predicate.clone(),
            range: self.spec.bounds.into(),
        };
        let mut rs = match self.store.read_filter(req).await? {
            Some(rs) => rs,
            None => return Ok(()),
        };

        let res = self.read_series(&mut rs, f).await;
        close_result_set(rs, res)
    }

    async fn read_series(
        &mut self,
        rs: &mut ResultSetPtr,
        f: &mut TableConsumer<'_>,
    ) -> Result<()> {
        while rs.next().await {
            // 该 series 没有这个 field 的数据
            let cursor = match rs.cursor() {
                Some(cursor) => cursor,
                None => continue,
            };
            let tags = rs.tags().clone();

            let (done, waiter) = handoff(self.ctx.cancel_token());
            let table = with_typed_cursor!(cursor, cur => self.new_table(cur, tags, done).await?);
            if table.is_empty() {
                continue;
            }
            if !deliver(&self.ctx, table, waiter, f, &mut self.stats).await? {
                break;
            }
        }
        Ok(())
    }

    async fn new_table<T: CursorValue>(
        &self,
        cursor: ArrayCursorPtr<T>,
        tags: Tags,
        done: TableDone,
    ) -> Result<TableRef> {
        let bounds = self.spec.bounds;
        let layout = LayoutKey::new(
            TableMode::Series,
            tags.iter().map(|t| t.key_str().into_owned()).collect(),
            T::VALUE_TYPE,
        );
        let cols = self
            .cache
            .lock()
            .get_or_create_cols(layout, || determine_table_cols_for_series(&tags, T::VALUE_TYPE));
        let key = default_group_key_for_series(&tags, bounds);
        let source = SeriesSource::new(cursor, bounds, tags, self.cache.clone());
        let table = CursorTable::try_new(
            key,
            cols.schema.clone(),
            source,
            done,
            self.ctx.memory_pool(),
        )
        .await?;
        Ok(Box::new(table))
    }
}

#[async_trait::async_trait]
impl TableIterator for FilterIterator {
    async fn run(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        debug!(
            "read filter of bucket {} in {}",
            self.spec.bucket_id, self.spec.bounds
        );
        let res = self.read(f).await;
        self.cache.lock().release();
        debug!("read filter finished, stats: {:?}", self.stats);
        res
    }

    fn statistics(&self) -> CursorStats {
        self.stats
    }
}
