//! In-memory storage used by the tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use models::{CursorStats, Tags, Timestamp};
use parking_lot::Mutex;

use crate::cursor::{ArrayCursor, Cursor, CursorValue, ValueArray};
use crate::error::{Error, Result};
use crate::store::{
    GroupCursor, GroupCursorPtr, GroupResultSet, GroupResultSetPtr, ReadFilterRequest,
    ReadGroupRequest, ReadWindowAggregateRequest, ResultSet, ResultSetPtr, Store,
    StoreCapabilities, StringIterator, StringIteratorPtr, TagKeysRequest, TagValuesRequest,
};

pub struct VecCursor<T> {
    points: Vec<(Timestamp, T)>,
    pos: usize,
    block_size: usize,
    closes: Arc<AtomicUsize>,
}

impl<T: CursorValue> VecCursor<T> {
    pub fn new(points: Vec<(Timestamp, T)>, block_size: usize) -> Self {
        Self::with_close_counter(points, block_size, Arc::new(AtomicUsize::new(0)))
    }

    pub fn with_close_counter(
        points: Vec<(Timestamp, T)>,
        block_size: usize,
        closes: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            points,
            pos: 0,
            block_size: block_size.max(1),
            closes,
        }
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

#[async_trait::async_trait]
impl<T: CursorValue> ArrayCursor<T> for VecCursor<T> {
    async fn next(&mut self) -> Result<ValueArray<T>> {
        let end = (self.pos + self.block_size).min(self.points.len());
        let (timestamps, values) = self.points[self.pos..end].iter().cloned().unzip();
        self.pos = end;
        Ok(ValueArray::new(timestamps, values))
    }

    fn stats(&self) -> CursorStats {
        CursorStats::new(self.pos as u64, self.pos as u64 * 8)
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Samples of one series, `None` in a series list stands for a series without data.
#[derive(Debug, Clone)]
pub enum Points {
    Integer(Vec<(Timestamp, i64)>),
    Float(Vec<(Timestamp, f64)>),
    Unsigned(Vec<(Timestamp, u64)>),
    Boolean(Vec<(Timestamp, bool)>),
    String(Vec<(Timestamp, String)>),
}

impl Points {
    pub fn into_cursor(self, block_size: usize, closes: Arc<AtomicUsize>) -> Cursor {
        match self {
            Self::Integer(p) => {
                Cursor::Integer(Box::new(VecCursor::with_close_counter(p, block_size, closes)))
            }
            Self::Float(p) => {
                Cursor::Float(Box::new(VecCursor::with_close_counter(p, block_size, closes)))
            }
            Self::Unsigned(p) => {
                Cursor::Unsigned(Box::new(VecCursor::with_close_counter(p, block_size, closes)))
            }
            Self::Boolean(p) => {
                Cursor::Boolean(Box::new(VecCursor::with_close_counter(p, block_size, closes)))
            }
            Self::String(p) => {
                Cursor::String(Box::new(VecCursor::with_close_counter(p, block_size, closes)))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemSeries {
    pub tags: Tags,
    pub points: Option<Points>,
}

#[derive(Debug, Clone)]
pub struct MemGroup {
    pub key_vals: Vec<Vec<u8>>,
    pub series: Vec<Option<Points>>,
}

#[derive(Debug, Default)]
pub struct MemCounters {
    pub backend_calls: AtomicUsize,
    pub series_pulled: AtomicUsize,
    pub result_set_closes: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapturedRequest {
    Filter(ReadFilterRequest),
    Group(ReadGroupRequest),
    WindowAggregate(ReadWindowAggregateRequest),
    TagKeys(TagKeysRequest),
    TagValues(TagValuesRequest),
}

pub struct MemResultSet {
    series: VecDeque<MemSeries>,
    tags: Tags,
    cursor: Option<Cursor>,
    block_size: usize,
    residual: Option<String>,
    counters: Arc<MemCounters>,
    closes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ResultSet for MemResultSet {
    async fn next(&mut self) -> bool {
        match self.series.pop_front() {
            Some(series) => {
                self.counters.series_pulled.fetch_add(1, Ordering::SeqCst);
                self.tags = series.tags;
                self.cursor = series
                    .points
                    .map(|p| p.into_cursor(self.block_size, self.closes.clone()));
                true
            }
            None => false,
        }
    }

    fn cursor(&mut self) -> Option<Cursor> {
        self.cursor.take()
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn close(&mut self) {
        self.counters.result_set_closes.fetch_add(1, Ordering::SeqCst);
    }

    fn err(&mut self) -> Result<()> {
        match self.residual.take() {
            Some(reason) => Err(Error::Storage { reason }),
            None => Ok(()),
        }
    }
}

pub struct MemGroupCursor {
    key_vals: Vec<Vec<u8>>,
    cursors: VecDeque<Option<Cursor>>,
    cursor: Option<Cursor>,
    closes: Arc<AtomicUsize>,
}

impl MemGroupCursor {
    pub fn new(key_vals: Vec<Vec<u8>>, cursors: Vec<Option<Cursor>>) -> Self {
        Self {
            key_vals,
            cursors: cursors.into(),
            cursor: None,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

#[async_trait::async_trait]
impl GroupCursor for MemGroupCursor {
    async fn next(&mut self) -> bool {
        match self.cursors.pop_front() {
            Some(cursor) => {
                self.cursor = cursor;
                true
            }
            None => false,
        }
    }

    fn cursor(&mut self) -> Option<Cursor> {
        self.cursor.take()
    }

    fn partition_key_vals(&self) -> &[Vec<u8>] {
        &self.key_vals
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemGroupResultSet {
    groups: VecDeque<MemGroup>,
    block_size: usize,
    residual: Option<String>,
    counters: Arc<MemCounters>,
    cursor_closes: Arc<AtomicUsize>,
    group_closes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl GroupResultSet for MemGroupResultSet {
    async fn next(&mut self) -> Option<GroupCursorPtr> {
        let group = self.groups.pop_front()?;
        self.counters.series_pulled.fetch_add(1, Ordering::SeqCst);
        let cursors = group
            .series
            .into_iter()
            .map(|p| p.map(|p| p.into_cursor(self.block_size, self.cursor_closes.clone())))
            .collect::<Vec<_>>();
        let mut gc = MemGroupCursor::new(group.key_vals, cursors);
        gc.closes = self.group_closes.clone();
        Some(Box::new(gc))
    }

    fn close(&mut self) {
        self.counters.result_set_closes.fetch_add(1, Ordering::SeqCst);
    }

    fn err(&mut self) -> Result<()> {
        match self.residual.take() {
            Some(reason) => Err(Error::Storage { reason }),
            None => Ok(()),
        }
    }
}

pub struct MemStringIterator {
    values: VecDeque<Vec<u8>>,
}

impl MemStringIterator {
    pub fn new(values: Vec<Vec<u8>>) -> Self {
        Self {
            values: values.into(),
        }
    }
}

#[async_trait::async_trait]
impl StringIterator for MemStringIterator {
    async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.values.pop_front())
    }
}

/// A [`Store`] over series kept in memory.
///
/// Every read hands out fresh cursors, close calls of all of them are summed
/// up in [`MemStore::cursor_closes`].
pub struct MemStore {
    series: Vec<MemSeries>,
    groups: Vec<MemGroup>,
    tag_keys: Vec<Vec<u8>>,
    tag_values: Vec<Vec<u8>>,
    capabilities: StoreCapabilities,
    block_size: usize,
    residual: Option<String>,
    counters: Arc<MemCounters>,
    cursor_closes: Arc<AtomicUsize>,
    group_closes: Arc<AtomicUsize>,
    requests: Mutex<Vec<CapturedRequest>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            series: vec![],
            groups: vec![],
            tag_keys: vec![],
            tag_values: vec![],
            capabilities: StoreCapabilities::default(),
            block_size: 1024,
            residual: None,
            counters: Arc::new(MemCounters::default()),
            cursor_closes: Arc::new(AtomicUsize::new(0)),
            group_closes: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn with_series(mut self, tags: Tags, points: Option<Points>) -> Self {
        self.series.push(MemSeries { tags, points });
        self
    }

    pub fn with_group(mut self, key_vals: Vec<Vec<u8>>, series: Vec<Option<Points>>) -> Self {
        self.groups.push(MemGroup { key_vals, series });
        self
    }

    pub fn with_tag_keys(mut self, keys: Vec<Vec<u8>>) -> Self {
        self.tag_keys = keys;
        self
    }

    pub fn with_tag_values(mut self, values: Vec<Vec<u8>>) -> Self {
        self.tag_values = values;
        self
    }

    pub fn with_capabilities(mut self, capabilities: StoreCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Error reported by result sets once they are exhausted.
    pub fn with_residual_error(mut self, reason: &str) -> Self {
        self.residual = Some(reason.to_string());
        self
    }

    pub fn backend_calls(&self) -> usize {
        self.counters.backend_calls.load(Ordering::SeqCst)
    }

    /// Series (or groups) handed out by result sets so far.
    pub fn series_pulled(&self) -> usize {
        self.counters.series_pulled.load(Ordering::SeqCst)
    }

    pub fn result_set_closes(&self) -> usize {
        self.counters.result_set_closes.load(Ordering::SeqCst)
    }

    pub fn cursor_closes(&self) -> usize {
        self.cursor_closes.load(Ordering::SeqCst)
    }

    pub fn group_cursor_closes(&self) -> usize {
        self.group_closes.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, req: CapturedRequest) {
        self.counters.backend_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req);
    }

    fn result_set(&self) -> ResultSetPtr {
        Box::new(MemResultSet {
            series: self.series.iter().cloned().collect(),
            tags: vec![],
            cursor: None,
            block_size: self.block_size,
            residual: self.residual.clone(),
            counters: self.counters.clone(),
            closes: self.cursor_closes.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities.clone()
    }

    async fn read_filter(&self, req: ReadFilterRequest) -> Result<Option<ResultSetPtr>> {
        self.record(CapturedRequest::Filter(req));
        if self.series.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.result_set()))
    }

    async fn read_group(&self, req: ReadGroupRequest) -> Result<Option<GroupResultSetPtr>> {
        self.record(CapturedRequest::Group(req));
        if self.groups.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(MemGroupResultSet {
            groups: self.groups.iter().cloned().collect(),
            block_size: self.block_size,
            residual: self.residual.clone(),
            counters: self.counters.clone(),
            cursor_closes: self.cursor_closes.clone(),
            group_closes: self.group_closes.clone(),
        })))
    }

    async fn window_aggregate(
        &self,
        req: ReadWindowAggregateRequest,
    ) -> Result<Option<ResultSetPtr>> {
        self.record(CapturedRequest::WindowAggregate(req));
        if self.capabilities.window_aggregate.is_none() {
            return Err(Error::WindowAggregateUnsupported);
        }
        if self.series.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.result_set()))
    }

    async fn tag_keys(&self, req: TagKeysRequest) -> Result<StringIteratorPtr> {
        self.record(CapturedRequest::TagKeys(req));
        Ok(Box::new(MemStringIterator::new(self.tag_keys.clone())))
    }

    async fn tag_values(&self, req: TagValuesRequest) -> Result<StringIteratorPtr> {
        self.record(CapturedRequest::TagValues(req));
        Ok(Box::new(MemStringIterator::new(self.tag_values.clone())))
    }
}
