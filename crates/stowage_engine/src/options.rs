//! Engine open options.

/// Options for opening an [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Create the engine directory if it does not exist.
    pub create_if_missing: bool,

    /// Open without write access. The directory lock is taken shared and
    /// every mutating call fails with [`crate::EngineError::ReadOnly`].
    pub read_only: bool,

    /// Sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Compact the journal once it grows past this many bytes (0 = never).
    pub auto_checkpoint_bytes: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            sync_on_commit: true,
            auto_checkpoint_bytes: 0,
        }
    }
}

impl EngineOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for opening an existing engine read-only.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            create_if_missing: false,
            read_only: true,
            ..Self::default()
        }
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn auto_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.auto_checkpoint_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = EngineOptions::default();
        assert!(options.create_if_missing);
        assert!(!options.read_only);
        assert!(options.sync_on_commit);
        assert_eq!(options.auto_checkpoint_bytes, 0);
    }

    #[test]
    fn read_only_never_creates() {
        let options = EngineOptions::read_only();
        assert!(options.read_only);
        assert!(!options.create_if_missing);
    }

    #[test]
    fn builder() {
        let options = EngineOptions::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .auto_checkpoint_bytes(4096);
        assert!(!options.create_if_missing);
        assert!(!options.sync_on_commit);
        assert_eq!(options.auto_checkpoint_bytes, 4096);
    }
}
