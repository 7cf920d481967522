//! Paths, engine configuration and local collaborators for the CLI
//!
//! Layout under the data directory (default `~/.stealthpay`):
//! - `config.json`   engine configuration
//! - `signer.key`    local signing key (hex), stands in for an external wallet
//! - `ledger.json`   ledger snapshot the commands read and append to
//! - `keys/`, `scan/` engine key store and scanner state

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use stealthpay_engine::types::Address;
use stealthpay_engine::{
    EngineConfig, FileStore, KeySession, KeyStore, LocalSigner, MemoryLedger, PaymentScanner,
    SigningAuthority, UnlockPolicy,
};

use crate::password::prompt_password;

const SIGNER_FILE: &str = "signer.key";
const LEDGER_FILE: &str = "ledger.json";

/// Global flags as parsed by clap
#[derive(Debug, Default, Clone)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
    pub signer_key: Option<PathBuf>,
}

/// Resolved configuration for one command invocation
pub struct CliContext {
    pub config: EngineConfig,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub signer_path: PathBuf,
}

impl CliContext {
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let config_path = match &args.config {
            Some(path) => path.clone(),
            None => match &args.data_dir {
                Some(dir) => dir.join("config.json"),
                None => EngineConfig::default_path()?,
            },
        };
        let config = EngineConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        let data_dir = match &args.data_dir {
            Some(dir) => dir.clone(),
            None => config.data_dir()?,
        };
        let ledger_path = args
            .ledger
            .clone()
            .unwrap_or_else(|| data_dir.join(LEDGER_FILE));
        let signer_path = args
            .signer_key
            .clone()
            .unwrap_or_else(|| data_dir.join(SIGNER_FILE));

        tracing::debug!(data_dir = %data_dir.display(), "resolved cli paths");
        Ok(Self {
            config,
            config_path,
            data_dir,
            ledger_path,
            signer_path,
        })
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(&self.data_dir)
    }

    pub fn keystore(&self) -> KeyStore<FileStore> {
        KeyStore::new(self.store())
    }

    pub fn scanner<'a>(
        &self,
        ledger: &'a MemoryLedger,
    ) -> PaymentScanner<&'a MemoryLedger, FileStore> {
        PaymentScanner::new(ledger, self.store(), self.config.scan)
    }

    pub fn has_signer(&self) -> bool {
        self.signer_path.exists()
    }

    /// Load the local signing key
    pub fn load_signer(&self) -> Result<LocalSigner> {
        load_signer_key(&self.signer_path)
    }

    /// Load the signing key, creating a fresh one on first use
    pub fn load_or_create_signer(&self) -> Result<(LocalSigner, bool)> {
        if self.has_signer() {
            return Ok((self.load_signer()?, false));
        }
        let signer = LocalSigner::random();
        save_signer_key(&self.signer_path, &signer)?;
        Ok((signer, true))
    }

    pub fn account(&self) -> Result<Address> {
        Ok(self.load_signer()?.address())
    }

    pub fn load_ledger(&self) -> Result<MemoryLedger> {
        MemoryLedger::load(&self.ledger_path).with_context(|| {
            format!("Failed to read ledger snapshot {}", self.ledger_path.display())
        })
    }

    pub fn save_ledger(&self, ledger: &MemoryLedger) -> Result<()> {
        ledger.save(&self.ledger_path).with_context(|| {
            format!("Failed to write ledger snapshot {}", self.ledger_path.display())
        })
    }

    /// Prompt for the password and unlock under the configured policy
    pub async fn unlock(&self) -> Result<(KeySession, Address)> {
        let password = prompt_password("Enter password to unlock keys: ")?;
        self.unlock_with_password(&password).await
    }

    pub async fn unlock_with_password(&self, password: &str) -> Result<(KeySession, Address)> {
        let signer = self.load_signer()?;
        let account = signer.address();
        let keystore = self.keystore();
        if !keystore.exists(&account)? {
            bail!("No keys found for {}. Run 'stealthpay init' first.", account);
        }

        let mut session = KeySession::from_config(&self.config);
        match session.policy() {
            UnlockPolicy::PasswordOnly => session.unlock(&keystore, &account, password).await,
            UnlockPolicy::RequireSigner => {
                session
                    .unlock_with_signer(&keystore, &signer, password)
                    .await
            }
        }
        .context("Failed to unlock keys")?;

        Ok((session, account))
    }
}

pub fn load_signer_key(path: &Path) -> Result<LocalSigner> {
    if !path.exists() {
        bail!(
            "Signer key not found at {}. Run 'stealthpay init' or pass --signer-key",
            path.display()
        );
    }
    let encoded = Zeroizing::new(fs::read_to_string(path).context("Failed to read signer key")?);
    let bytes = Zeroizing::new(
        hex::decode(encoded.trim().trim_start_matches("0x")).context("Signer key is not hex")?,
    );
    Ok(LocalSigner::from_private_key(&bytes)?)
}

pub fn save_signer_key(path: &Path, signer: &LocalSigner) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("Failed to create data directory")?;
    }
    let encoded = Zeroizing::new(hex::encode(&signer.to_bytes()[..]));

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, encoded.as_bytes())?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, encoded.as_bytes())?;
    }

    Ok(())
}
