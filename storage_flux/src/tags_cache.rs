use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use datafusion::arrow::array::{Array, ArrayRef, StringArray, TimestampNanosecondArray};
use lru::LruCache;
use models::{Bounds, Timestamp};
use parking_lot::Mutex;
use tracing::warn;

use crate::table::columns::{LayoutKey, TableCols};

pub type TagsCacheRef = Arc<Mutex<TagsCache>>;

/// Reusable columns of one read.
///
/// Tables of a read repeat the same `_start`/`_stop` values and the same tag
/// values on every row, and many tables share the same column layout. The
/// cache hands out slices of previously built arrays instead of allocating
/// new ones for every record batch.
///
/// A cache belongs to exactly one iterator and is released when its read
/// finishes; lookups after that still work but are not cached.
#[derive(Debug)]
pub struct TagsCache {
    start_column: Option<(Timestamp, ArrayRef)>,
    stop_column: Option<(Timestamp, ArrayRef)>,
    // None 表示不缓存标签列
    tags: Option<LruCache<String, ArrayRef>>,
    layouts: HashMap<LayoutKey, Arc<TableCols>>,
    released: bool,
}

impl TagsCache {
    pub fn new(size: usize) -> Self {
        Self {
            start_column: None,
            stop_column: None,
            tags: NonZeroUsize::new(size).map(LruCache::new),
            layouts: HashMap::new(),
            released: false,
        }
    }

    pub fn new_ref(size: usize) -> TagsCacheRef {
        Arc::new(Mutex::new(Self::new(size)))
    }

    /// Arrays of length `len` holding the start and the stop of `bounds`.
    pub fn get_bounds(&mut self, bounds: Bounds, len: usize) -> (ArrayRef, ArrayRef) {
        if self.check_released() {
            return (repeat_time(bounds.start, len), repeat_time(bounds.stop, len));
        }
        let start = get_or_replace_time(&mut self.start_column, bounds.start, len);
        let stop = get_or_replace_time(&mut self.stop_column, bounds.stop, len);
        (start, stop)
    }

    /// A string array of length `len` with every element set to `value`.
    pub fn get_tag(&mut self, value: &str, len: usize) -> ArrayRef {
        if self.check_released() {
            return repeat_string(value, len);
        }
        let tags = match self.tags.as_mut() {
            Some(tags) => tags,
            None => return repeat_string(value, len),
        };

        if let Some(array) = tags.get(value) {
            if array.len() >= len {
                return array.slice(0, len);
            }
        }

        let array = repeat_string(value, len);
        tags.put(value.to_string(), array.clone());
        array
    }

    /// Column layout for `key`, built with `build` the first time the shape is seen.
    pub fn get_or_create_cols(
        &mut self,
        key: LayoutKey,
        build: impl FnOnce() -> TableCols,
    ) -> Arc<TableCols> {
        if self.check_released() {
            return Arc::new(build());
        }
        self.layouts
            .entry(key)
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    pub fn release(&mut self) {
        self.start_column = None;
        self.stop_column = None;
        if let Some(tags) = self.tags.as_mut() {
            tags.clear();
        }
        self.layouts.clear();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn check_released(&self) -> bool {
        let released = self.is_released();
        if released {
            warn!("lookup on a released tags cache, building uncached columns");
        }
        released
    }
}

fn get_or_replace_time(
    slot: &mut Option<(Timestamp, ArrayRef)>,
    ts: Timestamp,
    len: usize,
) -> ArrayRef {
    if let Some((cached_ts, array)) = slot {
        if *cached_ts == ts && array.len() >= len {
            return array.slice(0, len);
        }
    }
    let array = repeat_time(ts, len);
    *slot = Some((ts, array.clone()));
    array
}

pub(crate) fn repeat_time(ts: Timestamp, len: usize) -> ArrayRef {
    Arc::new(TimestampNanosecondArray::from(vec![ts; len]))
}

pub(crate) fn repeat_string(value: &str, len: usize) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(std::iter::repeat(value).take(len)))
}
