use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::paths::HoldfastPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldfastConfig {
    /// Reply deadline for vault requests issued by the serve loop and the
    /// site gateway.
    pub request_timeout_ms: u64,
    /// Liveness probe budget for popup surfaces.
    pub ping_attempts: u32,
    /// How long a popup may sit on a consent decision before the opener
    /// gives up.
    pub consent_timeout_ms: u64,
}

impl Default for HoldfastConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            ping_attempts: 20,
            consent_timeout_ms: 120_000,
        }
    }
}

impl HoldfastConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn consent_timeout(&self) -> Duration {
        Duration::from_millis(self.consent_timeout_ms)
    }
}

/// Session-only overrides for agents and tests.
fn apply_env_overrides(cfg: &mut HoldfastConfig) {
    fn apply_u64(var: &str, setter: impl FnOnce(u64)) {
        if let Ok(v) = std::env::var(var) {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    setter(n);
                }
            }
        }
    }

    apply_u64("HOLDFAST_REQUEST_TIMEOUT_MS", |n| {
        cfg.request_timeout_ms = n;
    });
    apply_u64("HOLDFAST_CONSENT_TIMEOUT_MS", |n| {
        cfg.consent_timeout_ms = n;
    });
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &HoldfastPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<HoldfastConfig> {
        if !self.path.exists() {
            let mut cfg = HoldfastConfig::default();
            apply_env_overrides(&mut cfg);
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: HoldfastConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &HoldfastConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_private(&self.path, &s).context("write config.toml")?;
        Ok(())
    }
}
