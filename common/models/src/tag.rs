use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub type TagKey = Vec<u8>;
pub type TagValue = Vec<u8>;
pub type Tags = Vec<Tag>;

/// Storage-internal key under which the measurement name of a series is stored.
pub const MEASUREMENT_TAG_KEY: &[u8] = b"\x00";
/// Storage-internal key under which the field name of a series is stored.
pub const FIELD_KEY_TAG_KEY: &[u8] = b"\xff";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub key: TagKey,
    pub value: TagValue,
}

impl Tag {
    pub fn new(key: impl Into<TagKey>, value: impl Into<TagValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}
