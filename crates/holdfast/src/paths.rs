use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct HoldfastPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl HoldfastPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("HOLDFAST_DATA_DIR"),
            std::env::var("HOLDFAST_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            let config_dir = PathBuf::from(config_dir);
            let log_file = data_dir.join("holdfast.log.jsonl");
            return Ok(Self {
                config_dir,
                data_dir,
                log_file,
            });
        }

        // macOS: ~/Library/Application Support/holdfast
        // Linux: ~/.config/holdfast
        // Windows: %APPDATA%\holdfast
        let proj =
            ProjectDirs::from("", "", "holdfast").context("failed to resolve project dirs")?;
        let config_dir = proj.config_dir().to_path_buf();
        let data_dir = proj.data_dir().to_path_buf();
        let log_file = data_dir.join("holdfast.log.jsonl");

        Ok(Self {
            config_dir,
            data_dir,
            log_file,
        })
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    /// Where `serve` keeps the encrypted vault blob between sessions. The
    /// vault itself never reads or writes this.
    pub fn vault_blob_path(&self) -> PathBuf {
        self.data_dir.join("vault.blob")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    /// Single-instance lock for `serve`.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("holdfast.lock")
    }
}
