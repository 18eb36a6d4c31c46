//! Bridges the storage engine's per-series cursors to the query engine's
//! table model.
//!
//! A [`reader::StoreReader`] turns a read spec into a [`reader::TableIterator`].
//! Running the iterator pulls series (or groups of series) from a
//! [`store::Store`], assembles each into a [`table::Table`] of arrow record
//! batches and hands it to the consumer, waiting until the consumer has
//! drained it before reading the next one.

pub use crate::error::{Error, GroupCursorError, Result};

pub mod cursor;
pub mod error;
pub mod reader;
pub mod store;
pub mod table;
pub mod tags_cache;

#[cfg(test)]
pub(crate) mod test_util;
