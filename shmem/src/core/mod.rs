use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::errors::{QueueError, Result};

mod layout;
mod segment;

pub use self::layout::{
    Layout, QueueHeader, SlotHeader, SlotRef, EMPTY_CURSOR, EMPTY_SLOT, HEADER_SIZE, LAYOUT_VERSION,
    MAX_CAPACITY, QUEUE_MAGIC,
};
pub use self::segment::Segment;

/// Attempts a by-index read makes before reporting a torn read.
pub const READ_RETRY_LIMIT: usize = 16;
/// Cursor re-snapshots a latest read makes before giving up.
pub const LATEST_RETRY_LIMIT: usize = 8;

pub static DEFAULT_NAME_PREFIX: &str = "/market_queue";
pub const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 1_000;

const MAX_NAME_PREFIX_LEN: usize = 200;

/// What `MarketQueue::delete` does with the shared segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Unmap this process's view only; the segment outlives the handle.
    #[default]
    Detach,
    /// Unmap and remove the segment for every process.
    Destroy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name_prefix: String,
    pub attach_timeout_ms: u64,
    pub delete_policy: DeletePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT_MS,
            delete_policy: DeletePolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Loads a TOML config, writing the defaults out first if the file is missing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<QueueConfig> {
        let cfg: QueueConfig = confy::load_path(path.as_ref())
            .map_err(|e| QueueError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let prefix = self.name_prefix.as_str();
        let body = prefix.strip_prefix('/').unwrap_or(prefix);
        if body.is_empty() {
            return Err(QueueError::InvalidConfig("name_prefix must not be empty".into()));
        }
        if body.contains('/') || body.contains('\0') {
            return Err(QueueError::InvalidConfig(format!(
                "name_prefix {:?} may only contain '/' as its first character",
                prefix
            )));
        }
        if prefix.len() > MAX_NAME_PREFIX_LEN {
            return Err(QueueError::InvalidConfig(format!(
                "name_prefix is longer than {} bytes",
                MAX_NAME_PREFIX_LEN
            )));
        }
        Ok(())
    }

    /// Name of the OS shared memory object backing `key`.
    pub fn os_id(&self, key: u32) -> String {
        format!("{}_{:08X}", self.name_prefix, key)
    }
}

#[derive(Default)]
pub struct QueueConfigBuilder {
    name_prefix: Option<String>,
    attach_timeout_ms: Option<u64>,
    delete_policy: Option<DeletePolicy>,
}

impl QueueConfigBuilder {
    pub fn name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn attach_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.attach_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<QueueConfig> {
        let defaults = QueueConfig::default();
        let cfg = QueueConfig {
            name_prefix: self.name_prefix.unwrap_or(defaults.name_prefix),
            attach_timeout_ms: self.attach_timeout_ms.unwrap_or(defaults.attach_timeout_ms),
            delete_policy: self.delete_policy.unwrap_or(defaults.delete_policy),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn os_id_renders_key_as_hex() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.os_id(0xFF00_0003), "/market_queue_FF000003");
        assert_eq!(cfg.os_id(7), "/market_queue_00000007");
    }

    #[test]
    fn builder_fills_defaults() -> Result<()> {
        let cfg = QueueConfig::builder().name_prefix("/ticks").build()?;
        assert_eq!(cfg.name_prefix, "/ticks");
        assert_eq!(cfg.attach_timeout_ms, DEFAULT_ATTACH_TIMEOUT_MS);
        assert_eq!(cfg.delete_policy, DeletePolicy::Detach);
        assert_eq!(DeletePolicy::default(), DeletePolicy::Detach);
        Ok(())
    }

    #[test]
    fn builder_rejects_bad_prefixes() {
        for prefix in ["", "/", "/a/b", "a/b", "nul\0"] {
            let res = QueueConfig::builder().name_prefix(prefix).build();
            assert!(
                matches!(res, Err(QueueError::InvalidConfig(_))),
                "prefix {:?} accepted",
                prefix
            );
        }
        assert!(QueueConfig::builder().name_prefix("plain").build().is_ok());
    }

    #[test]
    fn load_reads_toml() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("queue.toml");
        fs::write(
            &path,
            "name_prefix = \"/venue\"\nattach_timeout_ms = 25\ndelete_policy = \"destroy\"\n",
        )?;
        let cfg = QueueConfig::load(&path)?;
        assert_eq!(cfg.name_prefix, "/venue");
        assert_eq!(cfg.attach_timeout_ms, 25);
        assert_eq!(cfg.delete_policy, DeletePolicy::Destroy);
        Ok(())
    }

    #[test]
    fn load_fills_missing_fields() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("partial.toml");
        fs::write(&path, "attach_timeout_ms = 5\n")?;
        let cfg = QueueConfig::load(&path)?;
        assert_eq!(cfg.name_prefix, DEFAULT_NAME_PREFIX);
        assert_eq!(cfg.attach_timeout_ms, 5);
        Ok(())
    }
}
