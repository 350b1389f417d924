use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

mod defaults;
mod validation;

pub use defaults::DEFAULT_LEASE;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub vault: VaultSettings,
    pub issuer: IssuerSettings,
    pub rotation: RotationSettings,
    #[serde(default)]
    pub certificates: Vec<CertificateSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultSettings {
    pub addr: String,
    pub auth_backend: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

impl VaultSettings {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssuerSettings {
    /// Path to the external issuing tool.
    pub command: String,
    /// Flag name (without dashes) that carries the PKI role/domain.
    pub domain_flag: String,
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_output_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RotationSettings {
    pub cron_dir: PathBuf,
    pub user: String,
    /// Wrap scheduled runs in `flock` on the pair's lock file.
    pub lock: bool,
    /// Explicit cron schedule; derived from the lease when unset.
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CertificateSettings {
    pub service_name: String,
    pub host: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub directory: String,
    #[serde(default)]
    pub lease: Option<String>,
    #[serde(default)]
    pub vault_addr: Option<String>,
}

impl Settings {
    /// Creates a new `Settings` instance.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = defaults::apply_defaults(Config::builder())?;

        let path = config_path.unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_CONFIG_PATH));
        s = s.add_source(File::from(path).required(false));

        // e.g. VAULTCERT_VAULT__ADDR, VAULTCERT_ISSUER__COMMAND
        s = s.add_source(Environment::with_prefix("VAULTCERT").separator("__"));

        s.build()?.try_deserialize()
    }

    /// Merges CLI arguments into the settings, overriding values if present.
    pub fn merge_with_args(&mut self, args: &crate::Args) {
        if let Some(addr) = &args.vault_addr {
            addr.clone_into(&mut self.vault.addr);
        }
        if let Some(backend) = &args.auth_backend {
            backend.clone_into(&mut self.vault.auth_backend);
        }
        if args.insecure {
            self.vault.insecure_skip_verify = true;
        }
        if let Some(command) = &args.issuer_command {
            command.clone_into(&mut self.issuer.command);
        }
        if let Some(cron_dir) = &args.cron_dir {
            cron_dir.clone_into(&mut self.rotation.cron_dir);
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        validation::validate_settings(self)
    }

    /// Looks up a configured certificate by service name.
    #[must_use]
    pub fn certificate(&self, service_name: &str) -> Option<&CertificateSettings> {
        self.certificates
            .iter()
            .find(|cert| cert.service_name == service_name)
    }
}
