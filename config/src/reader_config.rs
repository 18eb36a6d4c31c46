use serde::{Deserialize, Serialize};

// 读取层的配置, 所有字段都有默认值
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Number of repeated tag-value columns kept by the tags cache of one read,
    /// `0` disables caching of tag columns.
    #[serde(default = "ReaderConfig::default_tags_cache_size")]
    pub tags_cache_size: usize,
    /// Maximum rows of a record batch synthesized by the reader.
    #[serde(default = "ReaderConfig::default_batch_size")]
    pub batch_size: usize,
    // bytes, unbounded if absent
    #[serde(default)]
    pub memory_limit: Option<usize>,
}

impl ReaderConfig {
    fn default_tags_cache_size() -> usize {
        1024
    }

    fn default_batch_size() -> usize {
        1000
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            tags_cache_size: Self::default_tags_cache_size(),
            batch_size: Self::default_batch_size(),
            memory_limit: None,
        }
    }
}

#[test]
fn test_config() {
    let config_str = r#"
[reader]
# keep at most 16 tag columns around
tags_cache_size = 16
batch_size = 500
memory_limit = 67108864
"#;

    let config: crate::Config = toml::from_str(config_str).unwrap();
    assert_eq!(config.reader.tags_cache_size, 16);
    assert_eq!(config.reader.batch_size, 500);
    assert_eq!(config.reader.memory_limit, Some(64 * 1024 * 1024));

    let config: crate::Config = toml::from_str("[reader]\nbatch_size = 10").unwrap();
    assert_eq!(config.reader.tags_cache_size, 1024);
    assert_eq!(config.reader.memory_limit, None);
}
