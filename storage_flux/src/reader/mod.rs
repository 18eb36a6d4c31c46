use std::sync::Arc;

use config::ReaderConfig;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::execution::memory_pool::{GreedyMemoryPool, MemoryPool, UnboundedMemoryPool};
use futures::TryStreamExt;
use models::CursorStats;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use self::filter::FilterIterator;
pub use self::group::{convert_group_mode, determine_aggregate_method, GroupIterator};
pub use self::spec::{
    GroupMode, ReadFilterSpec, ReadGroupSpec, ReadTagKeysSpec, ReadTagValuesSpec,
    ReadWindowAggregateSpec,
};
pub use self::tag_scan::{TagKeysIterator, TagValuesIterator};
pub use self::window::WindowAggregateIterator;
use crate::error::{Error, Result};
use crate::store::{
    GroupCapability, ResultSetPtr, StoreCapabilities, StoreRef, WindowAggregateCapability,
};
use crate::table::{into_stream, Ack, GroupKey, TableRef, TableWaiter};
use crate::tags_cache::{TagsCache, TagsCacheRef};

mod filter;
mod group;
mod spec;
mod tag_scan;
mod window;

/// Receives every non-empty table of a read.
///
/// Returning only means the table was accepted, the read continues once the
/// table is drained or dropped.
pub type TableConsumer<'a> = dyn FnMut(TableRef) -> Result<()> + Send + 'a;

#[async_trait::async_trait]
pub trait TableIterator: Send {
    /// Reads everything, handing tables to `f` one at a time.
    async fn run(&mut self, f: &mut TableConsumer<'_>) -> Result<()>;

    /// Accumulated over the tables delivered so far.
    fn statistics(&self) -> CursorStats;
}

pub type TableIteratorPtr = Box<dyn TableIterator>;

/// Per-read resources provided by the query side.
#[derive(Clone)]
pub struct ReadContext {
    cancel: CancellationToken,
    memory_pool: Arc<dyn MemoryPool>,
}

impl ReadContext {
    pub fn new(cancel: CancellationToken, memory_pool: Arc<dyn MemoryPool>) -> Self {
        Self {
            cancel,
            memory_pool,
        }
    }

    pub fn with_config(cancel: CancellationToken, config: &ReaderConfig) -> Self {
        let memory_pool: Arc<dyn MemoryPool> = match config.memory_limit {
            Some(limit) => Arc::new(GreedyMemoryPool::new(limit)),
            None => Arc::new(UnboundedMemoryPool::default()),
        };
        Self::new(cancel, memory_pool)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn memory_pool(&self) -> &Arc<dyn MemoryPool> {
        &self.memory_pool
    }
}

/// Entry point of the query side into a [`crate::store::Store`].
pub struct StoreReader {
    store: StoreRef,
    capabilities: StoreCapabilities,
    config: ReaderConfig,
}

impl StoreReader {
    pub fn new(store: StoreRef, config: ReaderConfig) -> Self {
        let capabilities = store.capabilities();
        Self {
            store,
            capabilities,
            config,
        }
    }

    pub fn read_filter(&self, ctx: ReadContext, spec: ReadFilterSpec) -> TableIteratorPtr {
        Box::new(FilterIterator::new(
            self.store.clone(),
            ctx,
            spec,
            self.new_cache(),
        ))
    }

    /// `None` when grouping can not be pushed down to the store.
    pub fn group_capability(&self) -> Option<&GroupCapability> {
        self.capabilities.group.as_ref()
    }

    pub fn read_group(&self, ctx: ReadContext, spec: ReadGroupSpec) -> TableIteratorPtr {
        Box::new(GroupIterator::new(
            self.store.clone(),
            ctx,
            spec,
            self.new_cache(),
        ))
    }

    /// `None` when window aggregates can not be pushed down to the store.
    pub fn window_aggregate_capability(&self) -> Option<&WindowAggregateCapability> {
        self.capabilities.window_aggregate.as_ref()
    }

    pub fn read_window_aggregate(
        &self,
        ctx: ReadContext,
        spec: ReadWindowAggregateSpec,
    ) -> TableIteratorPtr {
        Box::new(WindowAggregateIterator::new(
            self.store.clone(),
            ctx,
            spec,
            self.capabilities.window_aggregate.is_some(),
            self.config.batch_size,
            self.new_cache(),
        ))
    }

    pub fn read_tag_keys(&self, ctx: ReadContext, spec: ReadTagKeysSpec) -> TableIteratorPtr {
        Box::new(TagKeysIterator::new(self.store.clone(), ctx, spec))
    }

    pub fn read_tag_values(&self, ctx: ReadContext, spec: ReadTagValuesSpec) -> TableIteratorPtr {
        Box::new(TagValuesIterator::new(self.store.clone(), ctx, spec))
    }

    pub fn close(&self) {}

    fn new_cache(&self) -> TagsCacheRef {
        TagsCache::new_ref(self.config.tags_cache_size)
    }
}

/// Hands `table` to the consumer and parks until it is released.
///
/// Returns `false` if the read was cancelled meanwhile.
pub(crate) async fn deliver(
    ctx: &ReadContext,
    table: TableRef,
    waiter: TableWaiter,
    f: &mut TableConsumer<'_>,
    stats: &mut CursorStats,
) -> Result<bool> {
    f(table)?;
    match waiter.wait(ctx.cancel_token()).await {
        Ack::Consumed(table_stats) => {
            *stats += table_stats;
            Ok(true)
        }
        Ack::Failed { reason } => Err(Error::TableRead { reason }),
        Ack::Cancelled => {
            debug!("read cancelled with a table in flight");
            Ok(false)
        }
    }
}

/// Closes `rs`; an error of the read loop wins over the residual error of the result set.
pub(crate) fn close_result_set(mut rs: ResultSetPtr, res: Result<()>) -> Result<()> {
    rs.close();
    res?;
    rs.err()
}

/// A table drained to memory by [`collect_tables`].
#[derive(Debug)]
pub struct CollectedTable {
    pub key: GroupKey,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl CollectedTable {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Runs `iter` and drains every table it delivers, in delivery order.
pub async fn collect_tables(iter: &mut dyn TableIterator) -> Result<Vec<CollectedTable>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TableRef>();

    let producer = async move {
        let mut f = move |table: TableRef| {
            tx.send(table).map_err(|_| Error::TableRead {
                reason: "table consumer is gone".to_string(),
            })
        };
        iter.run(&mut f).await
    };

    let consumer = async move {
        let mut tables = vec![];
        let mut first_err = None;
        while let Some(table) = rx.recv().await {
            let key = table.key().clone();
            let schema = table.schema();
            match into_stream(table).try_collect::<Vec<_>>().await {
                Ok(batches) => tables.push(CollectedTable {
                    key,
                    schema,
                    batches,
                }),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        (tables, first_err)
    };

    let (res, (tables, err)) = tokio::join!(producer, consumer);
    if let Some(e) = err {
        return Err(e);
    }
    res?;
    Ok(tables)
}
