use anyhow::Context;
use tracing::{error, info};

use crate::cert;
use crate::command::{self, CommandLine};
use crate::config::{IssuerSettings, RotationSettings, Settings};
use crate::issue;
use crate::request::CertificateRequest;
use crate::rotation::{self, CronRegistry, JobHandle, RotationJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issuance {
    Issued,
    /// The pair on disk was present and unexpired.
    Skipped,
}

#[derive(Debug)]
pub struct EnsureReport {
    pub service_name: String,
    pub command: CommandLine,
    pub issuance: Issuance,
    pub job: JobHandle,
}

/// Drives one certificate from request to issued pair plus rotation job.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    issuer: IssuerSettings,
    rotation: RotationSettings,
    registry: CronRegistry,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            issuer: settings.issuer.clone(),
            rotation: settings.rotation.clone(),
            registry: CronRegistry::new(&settings.rotation),
        }
    }

    #[must_use]
    pub fn build_issuance_command(&self, req: &CertificateRequest) -> CommandLine {
        command::build_issuance_command(req, &self.issuer)
    }

    /// Derives the rotation job for `req` around `cmd`.
    ///
    /// # Errors
    /// Returns an error if no cron schedule fits the lease.
    pub fn rotation_job(
        &self,
        req: &CertificateRequest,
        cmd: &CommandLine,
    ) -> anyhow::Result<RotationJob> {
        rotation::schedule_rotation(
            req.service_name(),
            cmd,
            req.lease(),
            req.vault_addr(),
            &req.paths().lock,
            &self.rotation,
        )
        .with_context(|| format!("Cannot schedule rotation for '{}'", req.service_name()))
    }

    #[must_use]
    pub fn registry(&self) -> &CronRegistry {
        &self.registry
    }

    /// Builds the command, registers rotation, and issues now when needed.
    ///
    /// Issuance runs when forced, when the rotation job had to be rewritten
    /// (the command or schedule changed), or when the pair on disk is not a
    /// valid certificate for this request. The rotation job is registered
    /// even when immediate issuance fails, so a later scheduled run can
    /// recover once the store accepts it.
    ///
    /// # Errors
    /// Returns an error if scheduling cannot be derived, issuance fails, or
    /// the job cannot be registered.
    pub async fn ensure(
        &self,
        req: &CertificateRequest,
        force: bool,
    ) -> anyhow::Result<EnsureReport> {
        let service = req.service_name();
        let cmd = self.build_issuance_command(req);
        let job = self.rotation_job(req, &cmd)?;
        let paths = req.paths();

        let registered = self.registry.register(&job).await;
        let job_changed = registered.as_ref().is_ok_and(|handle| handle.changed);
        if job_changed && !force {
            info!("Rotation job for '{service}' changed; issuing with the new command.");
        }

        let issued = if force || job_changed || cert::needs_issuance(req).await {
            issue::issue_now(&cmd, &paths, &self.issuer)
                .await
                .map(|_| Issuance::Issued)
        } else {
            Ok(Issuance::Skipped)
        };

        let issuance = match (issued, registered) {
            (Ok(issuance), Ok(job_handle)) => {
                return Ok(EnsureReport {
                    service_name: service.to_string(),
                    command: cmd,
                    issuance,
                    job: job_handle,
                });
            }
            (Ok(_), Err(err)) => return Err(err),
            (Err(issue_err), Ok(_)) => issue_err,
            (Err(issue_err), Err(reg_err)) => {
                error!("Rotation job registration failed for '{service}': {reg_err:#}");
                issue_err
            }
        };
        Err(anyhow::Error::new(issuance)
            .context(format!("Certificate issuance failed for '{service}'")))
    }

    /// Runs [`LifecycleManager::ensure`] for each request in order.
    ///
    /// A failing request does not stop the ones after it.
    ///
    /// # Errors
    /// Returns the first error once every request has been attempted.
    pub async fn ensure_all(
        &self,
        requests: &[CertificateRequest],
        force: bool,
    ) -> anyhow::Result<Vec<EnsureReport>> {
        let mut reports = Vec::new();
        let mut first_error = None;
        for req in requests {
            match self.ensure(req, force).await {
                Ok(report) => {
                    info!(
                        "Service '{}': issuance {:?}, rotation job {}{}",
                        report.service_name,
                        report.issuance,
                        report.job.path.display(),
                        if report.job.changed { " (updated)" } else { "" }
                    );
                    reports.push(report);
                }
                Err(err) => {
                    error!("{err:#}");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(reports), Err)
    }
}
