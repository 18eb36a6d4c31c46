use std::sync::Arc;

use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::scalar::ScalarValue;
use models::{Bounds, Tag, ValueType};

use super::GroupKey;

pub const DEFAULT_START_COL_LABEL: &str = "_start";
pub const DEFAULT_STOP_COL_LABEL: &str = "_stop";
pub const DEFAULT_TIME_COL_LABEL: &str = "_time";
pub const DEFAULT_VALUE_COL_LABEL: &str = "_value";
pub const MEASUREMENT_COL_LABEL: &str = "_measurement";
pub const FIELD_COL_LABEL: &str = "_field";

pub const START_COL_IDX: usize = 0;
pub const STOP_COL_IDX: usize = 1;
pub const VALUE_COL_IDX: usize = 3;
/// Position of `_value` in layouts without a `_time` column.
pub const VALUE_COL_IDX_WITHOUT_TIME: usize = 2;

pub fn time_data_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, None)
}

/// Which read produced a table; part of the shape a layout is cached by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableMode {
    Series,
    Group,
    WindowAggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColMeta {
    pub label: String,
    pub data_type: DataType,
}

impl ColMeta {
    pub fn new(label: impl Into<String>, data_type: DataType) -> Self {
        Self {
            label: label.into(),
            data_type,
        }
    }

    pub fn time(label: impl Into<String>) -> Self {
        Self::new(label, time_data_type())
    }

    pub fn string(label: impl Into<String>) -> Self {
        Self::new(label, DataType::Utf8)
    }

    fn to_field(&self, nullable: bool) -> Field {
        Field::new(&self.label, self.data_type.clone(), nullable)
    }
}

/// Shape of a table layout: mode, tag/group-key labels and value kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    pub mode: TableMode,
    pub labels: Vec<String>,
    pub value_type: ValueType,
}

impl LayoutKey {
    pub fn new(mode: TableMode, labels: Vec<String>, value_type: ValueType) -> Self {
        Self {
            mode,
            labels,
            value_type,
        }
    }
}

/// Column metadata of a table and the arrow schema derived from it.
#[derive(Debug)]
pub struct TableCols {
    pub cols: Vec<ColMeta>,
    pub schema: SchemaRef,
}

impl TableCols {
    fn new(cols: Vec<ColMeta>) -> Self {
        let fields = cols
            .iter()
            .map(|c| c.to_field(c.label == DEFAULT_VALUE_COL_LABEL))
            .collect::<Vec<_>>();
        Self {
            schema: Arc::new(Schema::new(fields)),
            cols,
        }
    }
}

/// `_start, _stop, _time, _value` followed by one string column per tag, in tag order.
pub fn determine_table_cols_for_series(tags: &[Tag], typ: ValueType) -> TableCols {
    let mut cols = Vec::with_capacity(VALUE_COL_IDX + 1 + tags.len());
    cols.push(ColMeta::time(DEFAULT_START_COL_LABEL));
    cols.push(ColMeta::time(DEFAULT_STOP_COL_LABEL));
    cols.push(ColMeta::time(DEFAULT_TIME_COL_LABEL));
    cols.push(ColMeta::new(DEFAULT_VALUE_COL_LABEL, typ.to_arrow_type()));
    cols.extend(tags.iter().map(|t| ColMeta::string(t.key_str())));
    TableCols::new(cols)
}

/// `_start, _stop, _value` followed by one string column per group key.
///
/// `group_keys` are expected to be filtered by [`group_key_columns`].
pub fn determine_table_cols_for_group(group_keys: &[&str], typ: ValueType) -> TableCols {
    let mut cols = Vec::with_capacity(VALUE_COL_IDX_WITHOUT_TIME + 1 + group_keys.len());
    cols.push(ColMeta::time(DEFAULT_START_COL_LABEL));
    cols.push(ColMeta::time(DEFAULT_STOP_COL_LABEL));
    cols.push(ColMeta::new(DEFAULT_VALUE_COL_LABEL, typ.to_arrow_type()));
    cols.extend(group_keys.iter().map(|k| ColMeta::string(*k)));
    TableCols::new(cols)
}

/// `_start, _stop, _value` followed by one string column per tag of the series.
pub fn determine_table_cols_for_window_aggregate(tags: &[Tag], typ: ValueType) -> TableCols {
    let mut cols = Vec::with_capacity(VALUE_COL_IDX_WITHOUT_TIME + 1 + tags.len());
    cols.push(ColMeta::time(DEFAULT_START_COL_LABEL));
    cols.push(ColMeta::time(DEFAULT_STOP_COL_LABEL));
    cols.push(ColMeta::new(DEFAULT_VALUE_COL_LABEL, typ.to_arrow_type()));
    cols.extend(tags.iter().map(|t| ColMeta::string(t.key_str())));
    TableCols::new(cols)
}

/// Single `_value` string column of tag enumerations.
pub fn determine_table_cols_for_strings() -> TableCols {
    TableCols::new(vec![ColMeta::string(DEFAULT_VALUE_COL_LABEL)])
}

fn bounds_key(bounds: Bounds) -> (Vec<ColMeta>, Vec<ScalarValue>) {
    (
        vec![
            ColMeta::time(DEFAULT_START_COL_LABEL),
            ColMeta::time(DEFAULT_STOP_COL_LABEL),
        ],
        vec![
            ScalarValue::TimestampNanosecond(Some(bounds.start), None),
            ScalarValue::TimestampNanosecond(Some(bounds.stop), None),
        ],
    )
}

pub fn default_group_key_for_series(tags: &[Tag], bounds: Bounds) -> GroupKey {
    let (mut cols, mut values) = bounds_key(bounds);
    for tag in tags {
        cols.push(ColMeta::string(tag.key_str()));
        values.push(ScalarValue::Utf8(Some(tag.value_str().into_owned())));
    }
    GroupKey::new(cols, values)
}

/// Requested group keys that become columns, with their position in the request.
///
/// `_start`/`_stop` are always part of the key and duplicates keep their first position.
pub fn group_key_columns(group_keys: &[String]) -> Vec<(usize, &str)> {
    let mut columns: Vec<(usize, &str)> = Vec::with_capacity(group_keys.len());
    for (i, key) in group_keys.iter().enumerate() {
        let key = key.as_str();
        if key == DEFAULT_START_COL_LABEL || key == DEFAULT_STOP_COL_LABEL {
            continue;
        }
        if columns.iter().any(|(_, k)| *k == key) {
            continue;
        }
        columns.push((i, key));
    }
    columns
}

/// Value of each group key column taken from the partition key, `""` when missing.
pub fn group_key_values(columns: &[(usize, &str)], partition_key_vals: &[Vec<u8>]) -> Vec<String> {
    columns
        .iter()
        .map(|(i, _)| {
            partition_key_vals
                .get(*i)
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default()
        })
        .collect()
}

pub fn group_key_for_group(
    columns: &[(usize, &str)],
    values: &[String],
    bounds: Bounds,
) -> GroupKey {
    let (mut cols, mut key_values) = bounds_key(bounds);
    for ((_, label), value) in columns.iter().zip(values) {
        cols.push(ColMeta::string(*label));
        key_values.push(ScalarValue::Utf8(Some(value.clone())));
    }
    GroupKey::new(cols, key_values)
}
