use datafusion::arrow::array::{Array, TimestampNanosecondArray};
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use models::{CursorStats, Tags, Timestamp};
use snafu::ResultExt;
use tracing::debug;

use super::{
    close_result_set, deliver, determine_aggregate_method, ReadContext, ReadWindowAggregateSpec,
    TableConsumer, TableIterator,
};
use crate::cursor::{with_typed_cursor, ArrayCursorPtr, CursorValue};
use crate::error::{self, Error, Result};
use crate::store::{Aggregate, AggregateType, ReadWindowAggregateRequest, ResultSetPtr, StoreRef};
use crate::table::columns::{
    default_group_key_for_series, determine_table_cols_for_window_aggregate, LayoutKey, TableMode,
    START_COL_IDX, STOP_COL_IDX,
};
use crate::table::window::{WindowOptions, WindowSource};
use crate::table::{handoff, BufferedTable, CursorTable, GroupKey, TableDone, TableRef};
use crate::tags_cache::TagsCacheRef;

/// Aggregates of every window of each series, one delivered table per window.
pub struct WindowAggregateIterator {
    store: StoreRef,
    ctx: ReadContext,
    spec: ReadWindowAggregateSpec,
    supported: bool,
    batch_size: usize,
    cache: TagsCacheRef,
    stats: CursorStats,
}

impl WindowAggregateIterator {
    pub(crate) fn new(
        store: StoreRef,
        ctx: ReadContext,
        spec: ReadWindowAggregateSpec,
        supported: bool,
        batch_size: usize,
        cache: TagsCacheRef,
    ) -> Self {
        Self {
            store,
            ctx,
            spec,
            supported,
            batch_size,
            cache,
            stats: CursorStats::default(),
        }
    }

    async fn read(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        if self.spec.window_every <= 0 {
            return Err(Error::InvalidWindowEvery {
                every: self.spec.window_every,
            });
        }
        let aggregates = self
            .spec
            .aggregates
            .iter()
            .map(|a| determine_aggregate_method(a))
            .collect::<Result<Vec<_>>>()?;
        if !self.supported {
            return Err(Error::WindowAggregateUnsupported);
        }

        let filter = &self.spec.read_filter_spec;
        let src = self
            .store
            .get_source(filter.organization_id, filter.bucket_id);
        let req = ReadWindowAggregateRequest {
            read_source: src.encode()?,
            predicate: filter.predicate.clone(),
            range: filter.bounds.into(),
            window_every: self.spec.window_every,
            aggregate: aggregates
                .iter()
                .map(|agg_type| Aggregate {
                    agg_type: *agg_type,
                })
                .collect(),
        };
        let mut rs = match self.store.window_aggregate(req).await? {
            Some(rs) => rs,
            None => return Ok(()),
        };

        // count 的空窗口为 0, 其余聚合为 null
        let count_only =
            !aggregates.is_empty() && aggregates.iter().all(|a| *a == AggregateType::Count);
        let res = self.read_series(&mut rs, count_only, f).await;
        close_result_set(rs, res)
    }

    async fn read_series(
        &mut self,
        rs: &mut ResultSetPtr,
        count_only: bool,
        f: &mut TableConsumer<'_>,
    ) -> Result<()> {
        while rs.next().await {
            let cursor = match rs.cursor() {
                Some(cursor) => cursor,
                None => continue,
            };
            let tags = rs.tags().clone();

            let table = with_typed_cursor!(
                cursor,
                cur => self.new_table(cur, tags, count_only).await?
            );
            if table.is_empty() {
                continue;
            }
            if !self.split_windows(table, f).await? {
                break;
            }
        }
        Ok(())
    }

    async fn new_table<T: CursorValue>(
        &self,
        cursor: ArrayCursorPtr<T>,
        tags: Tags,
        count_only: bool,
    ) -> Result<TableRef> {
        let bounds = self.spec.read_filter_spec.bounds;
        let layout = LayoutKey::new(
            TableMode::WindowAggregate,
            tags.iter().map(|t| t.key_str().into_owned()).collect(),
            T::VALUE_TYPE,
        );
        let cols = self.cache.lock().get_or_create_cols(layout, || {
            determine_table_cols_for_window_aggregate(&tags, T::VALUE_TYPE)
        });
        let key = default_group_key_for_series(&tags, bounds);
        let options = WindowOptions {
            every: self.spec.window_every,
            create_empty: self.spec.create_empty,
            empty_value: if count_only { T::zero() } else { None },
            batch_size: self.batch_size,
        };
        let source = WindowSource::new(cursor, bounds, options, tags, self.cache.clone());
        // 窗口表在读取侧拆分, 不直接交给消费者
        let table = CursorTable::try_new(
            key,
            cols.schema.clone(),
            source,
            TableDone::detached(),
            self.ctx.memory_pool(),
        )
        .await?;
        Ok(Box::new(table))
    }

    /// Delivers the rows of `table` as one table per window.
    ///
    /// Returns `false` if the read was cancelled meanwhile.
    async fn split_windows(
        &mut self,
        mut table: TableRef,
        f: &mut TableConsumer<'_>,
    ) -> Result<bool> {
        let key = table.key().clone();
        let schema = table.schema();
        // 一个窗口的行可能跨越多个 batch
        let mut open: Option<OpenWindow> = None;
        while let Some(batch) = table.next_batch().await? {
            let (starts, stops) = match (
                batch
                    .column(START_COL_IDX)
                    .as_any()
                    .downcast_ref::<TimestampNanosecondArray>(),
                batch
                    .column(STOP_COL_IDX)
                    .as_any()
                    .downcast_ref::<TimestampNanosecondArray>(),
            ) {
                (Some(starts), Some(stops)) => (starts, stops),
                _ => {
                    return Err(Error::TableRead {
                        reason: "window table without time bounds".to_string(),
                    })
                }
            };

            let mut offset = 0;
            while offset < batch.num_rows() {
                let start = starts.value(offset);
                let mut end = offset + 1;
                while end < batch.num_rows() && starts.value(end) == start {
                    end += 1;
                }
                let rows = batch.slice(offset, end - offset);
                let stop = stops.value(offset);
                offset = end;

                match open.as_mut() {
                    Some(window) if window.start == start => window.batches.push(rows),
                    _ => {
                        let next = OpenWindow {
                            start,
                            stop,
                            batches: vec![rows],
                        };
                        if let Some(window) = open.replace(next) {
                            if !self.deliver_window(&key, &schema, window, f).await? {
                                return Ok(false);
                            }
                        }
                    }
                }
            }
        }
        if let Some(window) = open.take() {
            if !self.deliver_window(&key, &schema, window, f).await? {
                return Ok(false);
            }
        }
        self.stats += table.statistics();
        Ok(true)
    }

    async fn deliver_window(
        &mut self,
        key: &GroupKey,
        schema: &SchemaRef,
        window: OpenWindow,
        f: &mut TableConsumer<'_>,
    ) -> Result<bool> {
        let batch = concat_batches(schema, &window.batches).context(error::ArrowSnafu)?;
        let (done, waiter) = handoff(self.ctx.cancel_token());
        let table = BufferedTable::new(key.with_bounds(window.start, window.stop), batch, done);
        deliver(&self.ctx, Box::new(table), waiter, f, &mut self.stats).await
    }
}

/// Rows of one window not yet delivered.
struct OpenWindow {
    start: Timestamp,
    stop: Timestamp,
    batches: Vec<RecordBatch>,
}

#[async_trait::async_trait]
impl TableIterator for WindowAggregateIterator {
    async fn run(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        debug!(
            "read window aggregate of bucket {} every {}",
            self.spec.read_filter_spec.bucket_id, self.spec.window_every
        );
        let res = self.read(f).await;
        self.cache.lock().release();
        debug!("read window aggregate finished, stats: {:?}", self.stats);
        res
    }

    fn statistics(&self) -> CursorStats {
        self.stats
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use config::ReaderConfig;
    use datafusion::arrow::array::{Array, Float64Array, Int64Array};
    use datafusion::scalar::ScalarValue;
    use models::{Bounds, CursorStats, Tag};
    use tokio_util::sync::CancellationToken;

    use crate::reader::{
        collect_tables, CollectedTable, ReadContext, ReadFilterSpec, ReadWindowAggregateSpec,
        StoreReader,
    };
    use crate::store::{AggregateType, StoreCapabilities, WindowAggregateCapability};
    use crate::table::TableRef;
    use crate::test_util::{CapturedRequest, MemStore, Points};
    use crate::Error;

    const HOUR: i64 = 3_600_000_000_000;

    fn ctx() -> ReadContext {
        ReadContext::with_config(CancellationToken::new(), &ReaderConfig::default())
    }

    fn window_store() -> MemStore {
        MemStore::new().with_capabilities(StoreCapabilities {
            group: None,
            window_aggregate: Some(WindowAggregateCapability::new([
                AggregateType::Count,
                AggregateType::Mean,
            ])),
        })
    }

    fn spec(aggregates: &[&str], create_empty: bool) -> ReadWindowAggregateSpec {
        ReadWindowAggregateSpec {
            read_filter_spec: ReadFilterSpec::new(1, 2, Bounds::new(0, 3 * HOUR)),
            window_every: HOUR,
            aggregates: aggregates.iter().map(|a| a.to_string()).collect(),
            create_empty,
        }
    }

    fn bounds_of(table: &CollectedTable) -> (Option<&ScalarValue>, Option<&ScalarValue>) {
        (table.key.value_of("_start"), table.key.value_of("_stop"))
    }

    #[tokio::test]
    async fn test_scenario_e_create_empty() {
        let store = window_store().with_series(
            vec![Tag::new("host", "a")],
            Some(Points::Integer(vec![(10, 4)])),
        );
        let store = Arc::new(store);
        let reader = StoreReader::new(store.clone(), ReaderConfig::default());
        let mut iter = reader.read_window_aggregate(ctx(), spec(&["count"], true));

        let tables = collect_tables(iter.as_mut()).await.unwrap();
        assert_eq!(tables.len(), 3);
        for (i, table) in tables.iter().enumerate() {
            let start = i as i64 * HOUR;
            assert_eq!(
                bounds_of(table),
                (
                    Some(&ScalarValue::TimestampNanosecond(Some(start), None)),
                    Some(&ScalarValue::TimestampNanosecond(Some(start + HOUR), None))
                )
            );
            let labels = table
                .schema
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .collect::<Vec<_>>();
            assert_eq!(labels, vec!["_start", "_stop", "_value", "host"]);
            assert_eq!(table.num_rows(), 1);
        }

        let value = |t: &CollectedTable| {
            t.batches[0]
                .column(2)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap()
                .value(0)
        };
        assert_eq!(value(&tables[0]), 4);
        // empty windows of a count carry zero
        assert_eq!(value(&tables[1]), 0);
        assert_eq!(value(&tables[2]), 0);
        assert_eq!(iter.statistics(), CursorStats::new(1, 8));
        assert_eq!(store.cursor_closes(), 1);
    }

    #[tokio::test]
    async fn test_empty_windows_of_mean_are_null() {
        let store = window_store().with_series(
            vec![Tag::new("host", "a")],
            Some(Points::Float(vec![(2 * HOUR + 5, 1.5)])),
        );
        let reader = StoreReader::new(Arc::new(store), ReaderConfig::default());
        let mut iter = reader.read_window_aggregate(ctx(), spec(&["mean"], true));

        let tables = collect_tables(iter.as_mut()).await.unwrap();
        assert_eq!(tables.len(), 3);
        let values = tables
            .iter()
            .map(|t| {
                let array = t.batches[0]
                    .column(2)
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .unwrap();
                (!array.is_null(0)).then(|| array.value(0))
            })
            .collect::<Vec<_>>();
        assert_eq!(values, vec![None, None, Some(1.5)]);
    }

    #[tokio::test]
    async fn test_without_create_empty() {
        let store = window_store().with_series(
            vec![Tag::new("host", "a")],
            Some(Points::Integer(vec![(10, 4), (2 * HOUR, 1)])),
        );
        let reader = StoreReader::new(Arc::new(store), ReaderConfig::default());
        let mut iter = reader.read_window_aggregate(ctx(), spec(&["count"], false));

        let tables = collect_tables(iter.as_mut()).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(
            bounds_of(&tables[1]).0,
            Some(&ScalarValue::TimestampNanosecond(Some(2 * HOUR), None))
        );
    }

    #[tokio::test]
    async fn test_window_rows_across_batches() {
        // two aggregates per window, batches of three rows cut the second window
        let store = window_store().with_series(
            vec![Tag::new("host", "a")],
            Some(Points::Integer(vec![
                (10, 1),
                (20, 5),
                (HOUR + 10, 2),
                (HOUR + 20, 7),
            ])),
        );
        let config = ReaderConfig {
            batch_size: 3,
            ..Default::default()
        };
        let reader = StoreReader::new(Arc::new(store), config);
        let mut iter = reader.read_window_aggregate(ctx(), spec(&["min", "max"], false));

        let tables = collect_tables(iter.as_mut()).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].num_rows(), 2);
        assert_eq!(tables[1].num_rows(), 2);
        assert_eq!(
            bounds_of(&tables[1]).0,
            Some(&ScalarValue::TimestampNanosecond(Some(HOUR), None))
        );
        let values = tables[1].batches[0]
            .column(2)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec();
        assert_eq!(values, vec![2, 7]);
    }

    #[tokio::test]
    async fn test_bounds_from_min_timestamp() {
        let store = window_store().with_series(
            vec![Tag::new("host", "a")],
            Some(Points::Integer(vec![(10, 4)])),
        );
        let reader = StoreReader::new(Arc::new(store), ReaderConfig::default());
        let spec = ReadWindowAggregateSpec {
            read_filter_spec: ReadFilterSpec::new(1, 2, Bounds::new(i64::MIN + 2, 3 * HOUR)),
            window_every: HOUR,
            aggregates: vec!["count".to_string()],
            create_empty: false,
        };
        let mut iter = reader.read_window_aggregate(ctx(), spec);

        let tables = collect_tables(iter.as_mut()).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(
            bounds_of(&tables[0]),
            (
                Some(&ScalarValue::TimestampNanosecond(Some(0), None)),
                Some(&ScalarValue::TimestampNanosecond(Some(HOUR), None))
            )
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_reading_windows() {
        let points = || Points::Integer(vec![(10, 1), (HOUR + 10, 2), (2 * HOUR + 10, 3)]);
        let store = window_store()
            .with_series(vec![Tag::new("host", "a")], Some(points()))
            .with_series(vec![Tag::new("host", "b")], Some(points()));
        let store = Arc::new(store);
        let reader = StoreReader::new(store.clone(), ReaderConfig::default());
        let token = CancellationToken::new();
        let ctx = ReadContext::with_config(token.clone(), &ReaderConfig::default());
        let mut iter = reader.read_window_aggregate(ctx, spec(&["count"], false));

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let mut kept: Vec<TableRef> = vec![];
        let mut f = move |table: TableRef| -> crate::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            kept.push(table);
            token.cancel();
            Ok(())
        };
        iter.run(&mut f).await.unwrap();
        drop(f);

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(store.series_pulled(), 1);
        // the window table of the first series is dropped half read
        assert_eq!(store.cursor_closes(), 1);
        assert_eq!(store.result_set_closes(), 1);
        assert_eq!(iter.statistics(), CursorStats::default());
    }

    #[tokio::test]
    async fn test_unsupported() {
        let store = Arc::new(MemStore::new());
        let reader = StoreReader::new(store.clone(), ReaderConfig::default());
        assert!(reader.window_aggregate_capability().is_none());
        let mut iter = reader.read_window_aggregate(ctx(), spec(&["count"], true));

        let err = collect_tables(iter.as_mut()).await.unwrap_err();
        assert!(matches!(err, Error::WindowAggregateUnsupported));
        assert_eq!(store.backend_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let store = Arc::new(window_store());
        let reader = StoreReader::new(store.clone(), ReaderConfig::default());

        let mut bad_every = spec(&["count"], false);
        bad_every.window_every = 0;
        let mut iter = reader.read_window_aggregate(ctx(), bad_every);
        let err = collect_tables(iter.as_mut()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidWindowEvery { every: 0 }));

        let mut iter = reader.read_window_aggregate(ctx(), spec(&["count", "mode"], false));
        let err = collect_tables(iter.as_mut()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownAggregateType { ref name } if name == "mode"));
        assert_eq!(store.backend_calls(), 0);
    }

    #[tokio::test]
    async fn test_request() {
        let store = Arc::new(window_store());
        let reader = StoreReader::new(store.clone(), ReaderConfig::default());
        let mut iter = reader.read_window_aggregate(ctx(), spec(&["Count", "mean"], false));
        collect_tables(iter.as_mut()).await.unwrap();

        match &store.captured()[0] {
            CapturedRequest::WindowAggregate(req) => {
                assert_eq!(req.window_every, HOUR);
                let aggs = req.aggregate.iter().map(|a| a.agg_type).collect::<Vec<_>>();
                assert_eq!(aggs, vec![AggregateType::Count, AggregateType::Mean]);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }
}
