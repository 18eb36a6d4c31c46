use std::sync::Arc;

use datafusion::arrow::array::StringArray;
use datafusion::arrow::record_batch::RecordBatch;
use models::{CursorStats, FIELD_KEY_TAG_KEY, MEASUREMENT_TAG_KEY};
use snafu::ResultExt;
use tracing::debug;

use super::{deliver, ReadContext, ReadTagKeysSpec, ReadTagValuesSpec, TableConsumer, TableIterator};
use crate::error::{self, Result};
use crate::store::{StoreRef, StringIteratorPtr, TagKeysRequest, TagValuesRequest};
use crate::table::columns::{
    determine_table_cols_for_strings, DEFAULT_START_COL_LABEL, DEFAULT_STOP_COL_LABEL,
    FIELD_COL_LABEL, MEASUREMENT_COL_LABEL,
};
use crate::table::{handoff, BufferedTable, GroupKey};

// 存储层的保留标签名转换成查询层的列名
fn tag_key_to_label(key: &[u8]) -> String {
    if key == MEASUREMENT_TAG_KEY {
        MEASUREMENT_COL_LABEL.to_string()
    } else if key == FIELD_KEY_TAG_KEY {
        FIELD_COL_LABEL.to_string()
    } else {
        String::from_utf8_lossy(key).into_owned()
    }
}

fn label_to_tag_key(label: &str) -> Vec<u8> {
    match label {
        MEASUREMENT_COL_LABEL => MEASUREMENT_TAG_KEY.to_vec(),
        FIELD_COL_LABEL => FIELD_KEY_TAG_KEY.to_vec(),
        _ => label.as_bytes().to_vec(),
    }
}

async fn collect_strings(
    mut iter: StringIteratorPtr,
    mut values: Vec<String>,
    translate: fn(&[u8]) -> String,
) -> Result<Vec<String>> {
    while let Some(value) = iter.next().await? {
        values.push(translate(&value));
    }
    Ok(values)
}

/// Delivers `values` as a single-column table, nothing if there are none.
async fn deliver_strings(
    ctx: &ReadContext,
    values: Vec<String>,
    f: &mut TableConsumer<'_>,
    stats: &mut CursorStats,
) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let cols = determine_table_cols_for_strings();
    let batch = RecordBatch::try_new(
        cols.schema.clone(),
        vec![Arc::new(StringArray::from_iter_values(values))],
    )
    .context(error::ArrowSnafu)?;

    let (done, waiter) = handoff(ctx.cancel_token());
    let table = BufferedTable::new(GroupKey::empty(), batch, done);
    deliver(ctx, Box::new(table), waiter, f, stats).await?;
    Ok(())
}

/// Tag keys of the matching series, led by `_start` and `_stop`.
pub struct TagKeysIterator {
    store: StoreRef,
    ctx: ReadContext,
    spec: ReadTagKeysSpec,
    stats: CursorStats,
}

impl TagKeysIterator {
    pub(crate) fn new(store: StoreRef, ctx: ReadContext, spec: ReadTagKeysSpec) -> Self {
        Self {
            store,
            ctx,
            spec,
            stats: CursorStats::default(),
        }
    }
}

#[async_trait::async_trait]
impl TableIterator for TagKeysIterator {
    async fn run(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        let filter = &self.spec.read_filter_spec;
        let src = self
            .store
            .get_source(filter.organization_id, filter.bucket_id);
        let req = TagKeysRequest {
            tags_source: src.encode()?,
            predicate: filter.predicate.clone(),
            range: filter.bounds.into(),
        };
        let iter = self.store.tag_keys(req).await?;

        let keys = vec![
            DEFAULT_START_COL_LABEL.to_string(),
            DEFAULT_STOP_COL_LABEL.to_string(),
        ];
        let keys = collect_strings(iter, keys, tag_key_to_label).await?;
        debug!("read {} tag keys", keys.len());
        deliver_strings(&self.ctx, keys, f, &mut self.stats).await
    }

    fn statistics(&self) -> CursorStats {
        self.stats
    }
}

/// Distinct values of one tag key of the matching series.
pub struct TagValuesIterator {
    store: StoreRef,
    ctx: ReadContext,
    spec: ReadTagValuesSpec,
    stats: CursorStats,
}

impl TagValuesIterator {
    pub(crate) fn new(store: StoreRef, ctx: ReadContext, spec: ReadTagValuesSpec) -> Self {
        Self {
            store,
            ctx,
            spec,
            stats: CursorStats::default(),
        }
    }
}

#[async_trait::async_trait]
impl TableIterator for TagValuesIterator {
    async fn run(&mut self, f: &mut TableConsumer<'_>) -> Result<()> {
        let filter = &self.spec.read_filter_spec;
        let src = self
            .store
            .get_source(filter.organization_id, filter.bucket_id);
        let req = TagValuesRequest {
            tags_source: src.encode()?,
            predicate: filter.predicate.clone(),
            range: filter.bounds.into(),
            tag_key: label_to_tag_key(&self.spec.tag_key),
        };
        let iter = self.store.tag_values(req).await?;

        let values =
            collect_strings(iter, vec![], |v| String::from_utf8_lossy(v).into_owned()).await?;
        debug!("read {} values of tag {}", values.len(), self.spec.tag_key);
        deliver_strings(&self.ctx, values, f, &mut self.stats).await
    }

    fn statistics(&self) -> CursorStats {
        self.stats
    }
}
