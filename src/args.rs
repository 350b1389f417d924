use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (default: vaultcert.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Secret store address (overrides vault.addr)
    #[arg(long, env = "VAULTCERT_ADDR", global = true)]
    pub vault_addr: Option<String>,

    /// Auth backend mount used for login (overrides vault.auth_backend)
    #[arg(long, global = true)]
    pub auth_backend: Option<String>,

    /// Accept an unverified TLS certificate from the secret store
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Issuing tool path (overrides issuer.command)
    #[arg(long, global = true)]
    pub issuer_command: Option<String>,

    /// cron.d directory for rotation jobs (overrides rotation.cron_dir)
    #[arg(long, global = true)]
    pub cron_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exchange an application identity for a token and print it
    Token(TokenArgs),
    /// Issue and schedule rotation for configured certificates
    Deploy(DeployArgs),
    /// Issue and schedule rotation for a single certificate given inline
    Ensure(Box<EnsureArgs>),
    /// Print the issuance command for a configured certificate
    Command(CommandArgs),
    /// Show on-disk state and rotation jobs for configured certificates
    Status,
}

#[derive(ClapArgs, Debug)]
pub struct TokenArgs {
    /// Application ID
    #[arg(long, env = "VAULTCERT_APP_ID")]
    pub app_id: String,

    /// User ID
    #[arg(long, env = "VAULTCERT_USER_ID", hide_env_values = true)]
    pub user_id: String,
}

#[derive(ClapArgs, Debug)]
pub struct DeployArgs {
    /// Only handle this service (default: all configured certificates)
    #[arg(long)]
    pub service: Option<String>,

    /// Issue even when a valid pair is already on disk
    #[arg(long)]
    pub force: bool,
}

#[derive(ClapArgs, Debug)]
pub struct EnsureArgs {
    /// Stable identifier used to name the rotation job
    #[arg(long)]
    pub service_name: String,

    /// Primary subject name (common name)
    #[arg(long)]
    pub host: String,

    /// PKI role/domain (default: host minus its first label)
    #[arg(long)]
    pub domain: Option<String>,

    /// DNS name or IPv4 address to add as a SAN (repeatable)
    #[arg(long = "alias")]
    pub aliases: Vec<String>,

    /// Output directory for the pair
    #[arg(long)]
    pub directory: String,

    /// Renewal period, e.g. 168h
    #[arg(long)]
    pub lease: Option<String>,

    /// VAULT_ADDR injected into the rotation job only
    #[arg(long = "job-vault-addr")]
    pub job_vault_addr: Option<String>,

    /// Issue even when a valid pair is already on disk
    #[arg(long)]
    pub force: bool,
}

#[derive(ClapArgs, Debug)]
pub struct CommandArgs {
    /// Configured service name
    #[arg(long)]
    pub service: String,

    /// Print the cron invocation instead of the issuance command
    #[arg(long)]
    pub rotation: bool,
}
