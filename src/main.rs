use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vaultcert::Args;
use vaultcert::args::{Command, CommandArgs, DeployArgs, EnsureArgs, TokenArgs};
use vaultcert::auth::{AuthTokenClient, Identity};
use vaultcert::cert::{self, PairState};
use vaultcert::config::{self, Settings};
use vaultcert::fs_util;
use vaultcert::lifecycle::LifecycleManager;
use vaultcert::request::CertificateRequest;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is reserved for command output such as the token.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    let result = match &args.command {
        Command::Token(token) => run_token(&settings, token).await,
        Command::Deploy(deploy) => run_deploy(&settings, deploy).await,
        Command::Ensure(ensure) => run_ensure(&settings, ensure).await,
        Command::Command(command) => run_command(&settings, command),
        Command::Status => run_status(&settings).await,
    };
    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = config::Settings::new(args.config.clone())
        .context("Failed to load configuration")?;
    settings.merge_with_args(args);
    settings.validate()?;
    info!(
        "Loaded {} certificate(s); secret store {}",
        settings.certificates.len(),
        settings.vault.addr
    );
    Ok(settings)
}

async fn run_token(settings: &Settings, args: &TokenArgs) -> anyhow::Result<()> {
    let identity = Identity::new(&args.app_id, &args.user_id)?;
    let client = AuthTokenClient::new(&settings.vault)?;
    let token = client
        .fetch_token(&identity)
        .await
        .with_context(|| format!("Login failed for app_id '{}'", identity.app_id()))?;
    println!("{}", token.expose());
    Ok(())
}

async fn run_deploy(settings: &Settings, args: &DeployArgs) -> anyhow::Result<()> {
    let selected: Vec<_> = match &args.service {
        Some(name) => vec![
            settings
                .certificate(name)
                .with_context(|| format!("No certificate configured for service '{name}'"))?,
        ],
        None => settings.certificates.iter().collect(),
    };
    if selected.is_empty() {
        info!("No certificates configured; nothing to deploy.");
        return Ok(());
    }
    let requests = selected
        .into_iter()
        .map(CertificateRequest::from_settings)
        .collect::<Result<Vec<_>, _>>()?;

    let manager = LifecycleManager::new(settings);
    let reports = manager.ensure_all(&requests, args.force).await?;
    info!("Deployed {} certificate(s).", reports.len());
    Ok(())
}

async fn run_ensure(settings: &Settings, args: &EnsureArgs) -> anyhow::Result<()> {
    let req = CertificateRequest::new(
        &args.service_name,
        &args.host,
        args.domain.as_deref(),
        args.aliases.clone(),
        &args.directory,
        args.lease.as_deref(),
        args.job_vault_addr.as_deref(),
    )?;
    let manager = LifecycleManager::new(settings);
    let report = manager.ensure(&req, args.force).await?;
    info!(
        "Service '{}': issuance {:?}, rotation job {}",
        report.service_name,
        report.issuance,
        report.job.path.display()
    );
    Ok(())
}

fn run_command(settings: &Settings, args: &CommandArgs) -> anyhow::Result<()> {
    let cert = settings
        .certificate(&args.service)
        .with_context(|| format!("No certificate configured for service '{}'", args.service))?;
    let req = CertificateRequest::from_settings(cert)?;
    let manager = LifecycleManager::new(settings);
    let cmd = manager.build_issuance_command(&req);
    if args.rotation {
        let job = manager.rotation_job(&req, &cmd)?;
        println!("{} {}", job.schedule(), job.invocation());
    } else {
        println!("{cmd}");
    }
    Ok(())
}

async fn run_status(settings: &Settings) -> anyhow::Result<()> {
    let manager = LifecycleManager::new(settings);
    for cert_settings in &settings.certificates {
        let req = CertificateRequest::from_settings(cert_settings)?;
        let paths = req.paths();
        let state = match cert::inspect_pair(&paths).await {
            Ok(PairState::Missing) => "missing".to_string(),
            Ok(PairState::Valid(at)) => format!("valid until {at}"),
            Ok(PairState::Expired(at)) => format!("expired at {at}"),
            Err(err) => format!("unreadable ({err})"),
        };
        let cert_mode = fs_util::file_mode(&paths.cert).await?;
        let key_mode = fs_util::file_mode(&paths.key).await?;
        let registered = manager.registry().is_registered(req.service_name()).await?;

        println!("{}:", req.service_name());
        println!("  cert: {} ({})", paths.cert.display(), format_mode(cert_mode));
        println!("  key: {} ({})", paths.key.display(), format_mode(key_mode));
        println!("  state: {state}");
        println!(
            "  rotation: {} ({})",
            manager.registry().job_path(req.service_name()).display(),
            if registered { "registered" } else { "not registered" }
        );
    }
    Ok(())
}

fn format_mode(mode: Option<u32>) -> String {
    mode.map_or_else(|| "absent".to_string(), |mode| format!("{mode:o}"))
}
