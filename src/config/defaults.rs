use config::{ConfigBuilder, ConfigError, builder::DefaultState};

pub(crate) const DEFAULT_CONFIG_PATH: &str = "vaultcert.toml";
pub const DEFAULT_LEASE: &str = "168h";

const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";
const DEFAULT_AUTH_BACKEND: &str = "app-id";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INSECURE_SKIP_VERIFY: bool = false;
const DEFAULT_ISSUER_COMMAND: &str = "/usr/local/bin/deploy-ssl-certificate";
const DEFAULT_DOMAIN_FLAG: &str = "role";
const DEFAULT_ISSUER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_BYTES: u64 = 64 * 1024;
const DEFAULT_CRON_DIR: &str = "/etc/cron.d";
const DEFAULT_CRON_USER: &str = "root";
const DEFAULT_ROTATION_LOCK: bool = true;

pub(crate) fn apply_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("vault.addr", DEFAULT_VAULT_ADDR)?
        .set_default("vault.auth_backend", DEFAULT_AUTH_BACKEND)?
        .set_default("vault.connect_timeout_secs", DEFAULT_CONNECT_TIMEOUT_SECS)?
        .set_default("vault.read_timeout_secs", DEFAULT_READ_TIMEOUT_SECS)?
        .set_default("vault.insecure_skip_verify", DEFAULT_INSECURE_SKIP_VERIFY)?
        .set_default("issuer.command", DEFAULT_ISSUER_COMMAND)?
        .set_default("issuer.domain_flag", DEFAULT_DOMAIN_FLAG)?
        .set_default("issuer.timeout_secs", DEFAULT_ISSUER_TIMEOUT_SECS)?
        .set_default("issuer.max_output_bytes", DEFAULT_MAX_OUTPUT_BYTES)?
        .set_default("rotation.cron_dir", DEFAULT_CRON_DIR)?
        .set_default("rotation.user", DEFAULT_CRON_USER)?
        .set_default("rotation.lock", DEFAULT_ROTATION_LOCK)
}
