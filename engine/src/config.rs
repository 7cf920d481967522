//! Engine configuration
//!
//! Loaded from `~/.stealthpay/config.json` by default. Every field has a
//! default, so a partial (or missing) file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::kdf::KdfParams;
use crate::scanner::ScanConfig;
use crate::session::UnlockPolicy;

/// Default directory for keys, scan state and config
const STEALTHPAY_DIR: &str = ".stealthpay";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kdf: KdfParams,
    pub scan: ScanConfig,
    pub unlock_policy: UnlockPolicy,
    /// Overrides the default data directory
    pub data_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// `~/.stealthpay`
    pub fn default_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(STEALTHPAY_DIR))
            .ok_or_else(|| EngineError::storage("locate", "could not find home directory"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::default_dir()?.join(CONFIG_FILE))
    }

    /// Read and validate; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(EngineError::storage("read", e)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        self.scan.validate()
    }

    /// Where keys and scan state live
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_dir(),
        }
    }
}
