use std::fmt::Display;

use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use models::ValueType;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("unknown aggregate type {:?}", name))]
    UnknownAggregateType { name: String },

    #[snafu(display("unknown group mode {:?}", mode))]
    UnknownGroupMode { mode: String },

    #[snafu(display("invalid window every {}, it must be positive", every))]
    InvalidWindowEvery { every: i64 },

    #[snafu(display("failed to encode read source: {}", source))]
    EncodeReadSource { source: bincode::Error },

    #[snafu(display("failed to decode read source: {}", source))]
    DecodeReadSource { source: bincode::Error },

    #[snafu(display("storage does not support window aggregate"))]
    WindowAggregateUnsupported,

    #[snafu(display("{}", source))]
    GroupCursor { source: GroupCursorError },

    #[snafu(display("storage error: {}", reason))]
    Storage { reason: String },

    #[snafu(display("arrow error: {}", source))]
    Arrow { source: ArrowError },

    #[snafu(display("memory exhausted while building table: {}", source))]
    MemoryExhausted { source: DataFusionError },

    #[snafu(display("table read failed: {}", reason))]
    TableRead { reason: String },
}

impl From<GroupCursorError> for Error {
    fn from(source: GroupCursorError) -> Self {
        Error::GroupCursor { source }
    }
}

/// Returned when two different cursor types are read for the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCursorError {
    pub expected: ValueType,
    pub got: ValueType,
}

impl Display for GroupCursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "schema collision: cannot group {} and {} types together",
            self.expected, self.got
        )
    }
}

impl std::error::Error for GroupCursorError {}
