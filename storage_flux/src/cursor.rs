use std::sync::Arc;

use datafusion::arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array,
};
use models::{CursorStats, Timestamp, ValueType};

use crate::error::Result;

/// A block of values read from one series/field, `timestamps[i]` belongs to `values[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueArray<T> {
    pub timestamps: Vec<Timestamp>,
    pub values: Vec<T>,
}

impl<T> ValueArray<T> {
    pub fn new(timestamps: Vec<Timestamp>, values: Vec<T>) -> Self {
        debug_assert_eq!(timestamps.len(), values.len());
        Self { timestamps, values }
    }

    pub fn empty() -> Self {
        Self {
            timestamps: vec![],
            values: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

impl<T> Default for ValueArray<T> {
    fn default() -> Self {
        Self::empty()
    }
}

pub type IntegerArray = ValueArray<i64>;
pub type FloatArray = ValueArray<f64>;
pub type UnsignedArray = ValueArray<u64>;
pub type BooleanValueArray = ValueArray<bool>;
pub type StringValueArray = ValueArray<String>;

// 存储层提供的游标, 每次移动得到一批同类型的列值
#[async_trait::async_trait]
pub trait ArrayCursor<T>: Send {
    /// Reads the next block, an empty block means the cursor is exhausted.
    async fn next(&mut self) -> Result<ValueArray<T>>;

    fn stats(&self) -> CursorStats;

    fn close(&mut self) {}
}

pub type ArrayCursorPtr<T> = Box<dyn ArrayCursor<T>>;

pub type IntegerArrayCursor = ArrayCursorPtr<i64>;
pub type FloatArrayCursor = ArrayCursorPtr<f64>;
pub type UnsignedArrayCursor = ArrayCursorPtr<u64>;
pub type BooleanArrayCursor = ArrayCursorPtr<bool>;
pub type StringArrayCursor = ArrayCursorPtr<String>;

/// A cursor of exactly one of the five value kinds.
pub enum Cursor {
    Integer(IntegerArrayCursor),
    Float(FloatArrayCursor),
    Unsigned(UnsignedArrayCursor),
    Boolean(BooleanArrayCursor),
    String(StringArrayCursor),
}

/// Expands `$body` once per cursor kind with `$typed` bound to the typed
/// cursor, so generic code over [`CursorValue`] is instantiated for every kind.
macro_rules! with_typed_cursor {
    ($cursor:expr, $typed:ident => $body:expr) => {
        match $cursor {
            $crate::cursor::Cursor::Integer($typed) => $body,
            $crate::cursor::Cursor::Float($typed) => $body,
            $crate::cursor::Cursor::Unsigned($typed) => $body,
            $crate::cursor::Cursor::Boolean($typed) => $body,
            $crate::cursor::Cursor::String($typed) => $body,
        }
    };
}
pub(crate) use with_typed_cursor;

impl Cursor {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Integer(_) => ValueType::Integer,
            Self::Float(_) => ValueType::Float,
            Self::Unsigned(_) => ValueType::Unsigned,
            Self::Boolean(_) => ValueType::Boolean,
            Self::String(_) => ValueType::String,
        }
    }

    pub fn stats(&self) -> CursorStats {
        with_typed_cursor!(self, c => c.stats())
    }

    pub fn close(&mut self) {
        with_typed_cursor!(self, c => c.close())
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("value_type", &self.value_type())
            .finish()
    }
}

/// Native value of one cursor kind and how it becomes an arrow column.
pub trait CursorValue: Clone + Send + Sync + 'static {
    const VALUE_TYPE: ValueType;

    fn into_array(values: Vec<Self>) -> ArrayRef;

    fn into_nullable_array(values: Vec<Option<Self>>) -> ArrayRef;

    /// Value of an empty window under a `count` aggregate, if this kind can hold one.
    fn zero() -> Option<Self>;

    /// Takes the typed cursor out of `cursor`, or gives it back if it is of another kind.
    fn from_cursor(cursor: Cursor) -> std::result::Result<ArrayCursorPtr<Self>, Cursor>;
}

macro_rules! impl_cursor_value {
    ($native:ty, $variant:ident, $array:ty, $zero:expr) => {
        impl CursorValue for $native {
            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn into_array(values: Vec<Self>) -> ArrayRef {
                Arc::new(<$array>::from(values))
            }

            fn into_nullable_array(values: Vec<Option<Self>>) -> ArrayRef {
                Arc::new(<$array>::from(values))
            }

            fn zero() -> Option<Self> {
                $zero
            }

            fn from_cursor(cursor: Cursor) -> std::result::Result<ArrayCursorPtr<Self>, Cursor> {
                match cursor {
                    Cursor::$variant(c) => Ok(c),
                    other => Err(other),
                }
            }
        }
    };
}

impl_cursor_value!(i64, Integer, Int64Array, Some(0));
impl_cursor_value!(f64, Float, Float64Array, Some(0.0));
impl_cursor_value!(u64, Unsigned, UInt64Array, Some(0));
impl_cursor_value!(bool, Boolean, BooleanArray, None);
impl_cursor_value!(String, String, StringArray, None);
