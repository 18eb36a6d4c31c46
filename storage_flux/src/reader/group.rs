use models::CursorStats;
use tracing::debug;

use super::{deliver, GroupMode, ReadContext, ReadGroupSpec, TableConsumer, TableIterator};
use crate::cursor::{with_typed_cursor, ArrayCursorPtr, CursorValue};
use crate::error::Result;
use crate::store::{
    Aggregate, AggregateType, GroupCursorPtr, GroupResultSetPtr, ReadGroup, ReadGroupRequest,
    StoreRef,
};
use crate::table::columns::{
    determine_table_cols_for_group, group_key_columns, group_key_for_group, group_key_values,
    LayoutKey, TableMode,
};
use crate::table::group::GroupSource;
use crate::table::{handoff, CursorTable, TableDone, TableRef};
use crate::tags_cache::TagsCacheRef;

/// Resolves an aggregate name, ignoring case; the empty name means no aggregate.
pub fn determine_aggregate_method(agg: &str) -> Result<AggregateType> {
    agg.parse()
}

pub fn convert_group_mode(mode: GroupMode) -> ReadGroup {
    match mode {
        GroupMode::None => ReadGroup::None,
        GroupMode::By => ReadGroup::By,
    }
}

/// One table per partition of the store, concatenating every series of the partition.
pub struct GroupIterator {
    store: StoreRef,
    ctx: ReadContext,
    spec: ReadGroupSpec,
    cache: TagsCacheRef,
    stats: CursorStats,
}

impl GroupIterator {
    pub(crate) fn new(
        store: StoreRef,
        ctx: ReadContext,
        spec: ReadGroupSpec,
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
        let agg = determine_aggregate_method(&self.spec.aggregate_method)?;
        let filter = &self.spec.read_filter_spec;
        let src = self
            .store
            .get_source(filter.organization_id, filter.bucket_id);
        let req = ReadGroupRequest {
            read_source: src.encode()?,
            predicate: filter.predicate.clone(),
            range: filter.bounds.into(),
            group: convert_group_mode(self.spec.group_mode),
            group_keys: self.spec.group_keys.clone(),
            aggregate: match agg {
                AggregateType::None => None,
                agg_type => Some(Aggregate { agg_type }),
            },
        };
        let mut rs = match self.store.read_group(req).await? {
            Some(rs) => rs,
            None => return Ok(()),
        };

        let res = self.read_groups(&mut rs, f).await;
        rs.close();
        res?;
        rs.err()
    }

    async fn read_groups(
        &mut self,
        rs: &mut GroupResultSetPtr,
        f: &mut TableConsumer<'_>,
    ) -> Result<()> {
        let group_keys = self.spec.group_keys.clone();
        let columns = group_key_columns(&group_keys);

        while let Some(mut gc) = rs.next().await {
            let mut first = None;
            while gc.next().await {
                if let Some(cursor) = gc.cursor() {
                    first = Some(cursor);
                    break;
                }
            }
            // 分组内没有任何数据
            let cursor = match first {
                Some(cursor) => cursor,
                None => {
                    gc.close();
                    continue;
                }
            };
            let values = group_key_values(&columns, gc.partition_key_vals());

            let (done, waiter) = handoff(self.ctx.cancel_token());
            let table = with_typed_cursor!(
                cursor,
                cur => self.new_table(cur, gc, &columns, values, done).await?
            );
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
        gc: GroupCursorPtr,
        columns: &[(usize, &str)],
        values: Vec<String>,
        done: TableDone,
    ) -> Result<TableRef> {
        let bounds = self.spec.read_filter_spec.bounds;
        let labels = columns.iter().map(|(_, l)| *l).collect::<Vec<_>>();
        let layout = LayoutKey::new(
            TableMode::Group,
            labels.iter().map(|l| l.to_string()).collect(),
            T::VALUE_TYPE,
        );
        let cols = self
            .cache
            .lock()
            .get_or_create_cols(layout, || determine_table_cols_for_group(&labels, T::VALUE_TYPE));
        let key = group_key_for_group(columns, &values, bounds);

        let source = GroupSource::collect(cursor, gc, bounds, values, self.cache.clone()).await?;
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
impl TableIterator for GroupIterator {
    async fn run(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        debug!(
            "read group of bucket {} by {:?}",
            self.spec.read_filter_spec.bucket_id, self.spec.group_keys
        );
        let res = self.read(f).await;
        self.cache.lock().release();
        debug!("read group finished, stats: {:?}", self.stats);
        res
    }

    fn statistics(&self) -> CursorStats {
        self.stats
    }
}
