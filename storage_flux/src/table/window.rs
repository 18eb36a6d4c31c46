use std::collections::VecDeque;
use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, TimestampNanosecondArray};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use models::{Bounds, CursorStats, Tags, Timestamp};
use snafu::ResultExt;

use super::TableSource;
use crate::cursor::{ArrayCursorPtr, CursorValue};
use crate::error::{self, Result};
use crate::tags_cache::TagsCacheRef;

/// Start of the window of length `every` holding `ts`, windows are aligned to the epoch.
///
/// The first window of the time line starts at `i64::MIN`.
pub fn window_start(ts: Timestamp, every: i64) -> Timestamp {
    ts.saturating_sub(ts.rem_euclid(every))
}

/// End (exclusive) of the window of length `every` holding `ts`.
pub fn window_stop(ts: Timestamp, every: i64) -> Timestamp {
    ts.saturating_add(every - ts.rem_euclid(every))
}

/// Options of a window aggregate table.
#[derive(Debug, Clone)]
pub(crate) struct WindowOptions<T> {
    pub every: i64,
    pub create_empty: bool,
    /// Value of a window without samples.
    pub empty_value: Option<T>,
    pub batch_size: usize,
}

/// One row per window of one series: `_start, _stop, _value, tags...`.
///
/// `_start`/`_stop` of a row are its window clipped to the read bounds. Each
/// aggregated point is expected to be stamped inside its window.
pub(crate) struct WindowSource<T: CursorValue> {
    cursor: Option<ArrayCursorPtr<T>>,
    bounds: Bounds,
    options: WindowOptions<T>,
    tags: Tags,
    cache: TagsCacheRef,
    points: VecDeque<(Timestamp, T)>,
    // create_empty 时下一个需要输出的窗口
    next_window: Timestamp,
    empty: bool,
    stats: CursorStats,
}

struct WindowRows<T> {
    starts: Vec<Timestamp>,
    stops: Vec<Timestamp>,
    values: Vec<Option<T>>,
}

impl<T> WindowRows<T> {
    fn with_capacity(n: usize) -> Self {
        Self {
            starts: Vec::with_capacity(n),
            stops: Vec::with_capacity(n),
            values: Vec::with_capacity(n),
        }
    }

    fn len(&self) -> usize {
        self.starts.len()
    }
}

impl<T: CursorValue> WindowSource<T> {
    pub(crate) fn new(
        cursor: ArrayCursorPtr<T>,
        bounds: Bounds,
        options: WindowOptions<T>,
        tags: Tags,
        cache: TagsCacheRef,
    ) -> Self {
        let next_window = window_start(bounds.start, options.every);
        Self {
            cursor: Some(cursor),
            bounds,
            options,
            tags,
            cache,
            points: VecDeque::new(),
            next_window,
            empty: true,
            stats: CursorStats::default(),
        }
    }

    async fn fill_points(&mut self) -> Result<()> {
        if !self.points.is_empty() {
            return Ok(());
        }
        if let Some(cursor) = self.cursor.as_mut() {
            let block = cursor.next().await?;
            if block.is_empty() {
                self.close_cursor();
            } else {
                self.points
                    .extend(block.timestamps.into_iter().zip(block.values));
            }
        }
        Ok(())
    }

    fn close_cursor(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            self.stats = cursor.stats();
            cursor.close();
        }
    }

    fn push_row(&self, rows: &mut WindowRows<T>, window: Timestamp, value: Option<T>) {
        let stop = window_stop(window, self.options.every);
        rows.starts.push(window.max(self.bounds.start));
        rows.stops.push(stop.min(self.bounds.stop));
        rows.values.push(value);
    }
}

#[async_trait::async_trait]
impl<T: CursorValue> TableSource for WindowSource<T> {
    async fn init(&mut self) -> Result<()> {
        self.fill_points().await?;
        self.empty = if self.options.create_empty {
            self.bounds.is_empty()
        } else {
            self.points.is_empty()
        };
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.empty
    }

    async fn read(&mut self, schema: &SchemaRef) -> Result<Option<RecordBatch>> {
        let every = self.options.every;
        let mut rows = WindowRows::with_capacity(self.options.batch_size.min(1024));
        while rows.len() < self.options.batch_size.max(1) {
            self.fill_points().await?;
            match self.points.front().map(|(ts, _)| window_start(*ts, every)) {
                Some(window) if self.options.create_empty && self.next_window < window => {
                    let empty_value = self.options.empty_value.clone();
                    self.push_row(&mut rows, self.next_window, empty_value);
                    self.next_window = window_stop(self.next_window, every);
                }
                Some(window) => {
                    if let Some((_, value)) = self.points.pop_front() {
                        self.push_row(&mut rows, window, Some(value));
                    }
                    self.next_window = self.next_window.max(window_stop(window, every));
                }
                None if self.options.create_empty && self.next_window < self.bounds.stop => {
                    let empty_value = self.options.empty_value.clone();
                    self.push_row(&mut rows, self.next_window, empty_value);
                    self.next_window = window_stop(self.next_window, every);
                }
                None => break,
            }
        }
        if rows.starts.is_empty() {
            return Ok(None);
        }

        let len = rows.len();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(3 + self.tags.len());
        columns.push(Arc::new(TimestampNanosecondArray::from(rows.starts)));
        columns.push(Arc::new(TimestampNanosecondArray::from(rows.stops)));
        columns.push(T::into_nullable_array(rows.values));
        {
            let mut cache = self.cache.lock();
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
        self.close_cursor();
    }
}
