use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::command::CommandLine;
use crate::config::RotationSettings;
use crate::request::Lease;

const CRON_FILE_PREFIX: &str = "vaultcert-";
const CRON_FILE_MODE: u32 = 0o644;
const CRON_SHELL: &str = "/bin/sh";
const CRON_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const FLOCK_PROGRAM: &str = "flock";
const CRON_NICKNAMES: [&str; 7] = [
    "@hourly",
    "@daily",
    "@midnight",
    "@weekly",
    "@monthly",
    "@yearly",
    "@annually",
];
// Only validity matters when checking a weekday field, so 7 folds into SAT.
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationError {
    #[error("lease {0} has no matching cron period; set rotation.schedule explicitly")]
    UnsupportedLease(String),
    #[error("'{0}' is not a five-field cron expression or periodic @nickname")]
    InvalidSchedule(String),
}

/// A recurring re-issuance of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationJob {
    service_name: String,
    schedule: String,
    command: CommandLine,
    vault_addr: Option<String>,
    lock_path: Option<PathBuf>,
}

impl RotationJob {
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[must_use]
    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    /// The issuance command this job re-runs, unwrapped.
    #[must_use]
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// What cron executes: optional `env VAULT_ADDR=…`, then the optional
    /// `flock` wrapper, then the issuance command.
    #[must_use]
    pub fn invocation(&self) -> CommandLine {
        let mut invocation = self.command.clone();
        if let Some(lock_path) = &self.lock_path {
            invocation = invocation.wrapped_by(
                CommandLine::new(FLOCK_PROGRAM)
                    .arg("-x")
                    .arg(lock_path.display().to_string()),
            );
        }
        if let Some(addr) = &self.vault_addr {
            invocation = invocation.with_vault_addr(addr);
        }
        invocation
    }

    fn cron_entry(&self, user: &str) -> String {
        format!(
            "# Managed by vaultcert. Rotates the certificate for service '{}'.\n\
SHELL={CRON_SHELL}\n\
PATH={CRON_PATH}\n\
{} {user} {}\n",
            self.service_name,
            self.schedule,
            escape_cron_percent(&self.invocation().to_string())
        )
    }
}

/// Result of registering a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub path: PathBuf,
    pub changed: bool,
}

/// Derives the rotation job for an issuance command.
///
/// # Errors
/// Returns an error if no schedule can be derived from `lease` and none is
/// configured.
pub fn schedule_rotation(
    service_name: &str,
    cmd: &CommandLine,
    lease: &Lease,
    vault_addr: Option<&str>,
    lock_path: &Path,
    settings: &RotationSettings,
) -> Result<RotationJob, RotationError> {
    let schedule = match &settings.schedule {
        Some(schedule) => {
            validate_schedule(schedule)?;
            schedule.trim().to_string()
        }
        None => schedule_for_lease(lease)?,
    };
    Ok(RotationJob {
        service_name: service_name.to_string(),
        schedule,
        command: cmd.clone(),
        vault_addr: vault_addr.map(ToString::to_string),
        lock_path: settings.lock.then(|| lock_path.to_path_buf()),
    })
}

/// Maps a lease onto a cron period no longer than the lease itself.
///
/// # Errors
/// Returns an error for leases cron cannot express as a fixed period.
pub fn schedule_for_lease(lease: &Lease) -> Result<String, RotationError> {
    let schedule = match lease.hours() {
        1 => "@hourly".to_string(),
        24 => "@daily".to_string(),
        168 => "@weekly".to_string(),
        hours if hours < 24 && 24 % hours == 0 => format!("0 */{hours} * * *"),
        hours if hours % 24 == 0 && (2..=31).contains(&(hours / 24)) => {
            format!("0 0 */{} * *", hours / 24)
        }
        _ => return Err(RotationError::UnsupportedLease(lease.to_string())),
    };
    Ok(schedule)
}

/// Accepts periodic `@nicknames` and five-field `cron(8)` expressions.
///
/// # Errors
/// Returns an error if `schedule` is neither.
pub fn validate_schedule(schedule: &str) -> Result<(), RotationError> {
    let trimmed = schedule.trim();
    let invalid = || RotationError::InvalidSchedule(trimmed.to_string());
    if trimmed.starts_with('@') {
        return if CRON_NICKNAMES.contains(&trimmed) {
            Ok(())
        } else {
            Err(invalid())
        };
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = fields.as_slice() else {
        return Err(invalid());
    };
    // The parser wants a seconds field and numbers weekdays from 1.
    let expr = format!(
        "0 {minute} {hour} {day} {} {}",
        month.to_ascii_uppercase(),
        weekday_names(&weekday.to_ascii_uppercase())
    );
    cron::Schedule::from_str(&expr)
        .map(|_| ())
        .map_err(|_| invalid())
}

fn weekday_names(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(ch) = rest.chars().next() {
        if !ch.is_ascii_digit() {
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
            continue;
        }
        let len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(len);
        let is_step = out.ends_with('/');
        match number.parse::<usize>() {
            Ok(day) if !is_step && day <= WEEKDAY_NAMES.len() => {
                out.push_str(WEEKDAY_NAMES[day.min(WEEKDAY_NAMES.len() - 1)]);
            }
            _ => out.push_str(number),
        }
        rest = tail;
    }
    out
}

/// Writes one `cron.d` file per service.
#[derive(Debug, Clone)]
pub struct CronRegistry {
    dir: PathBuf,
    user: String,
}

impl CronRegistry {
    #[must_use]
    pub fn new(settings: &RotationSettings) -> Self {
        Self {
            dir: settings.cron_dir.clone(),
            user: settings.user.trim().to_string(),
        }
    }

    #[must_use]
    pub fn job_path(&self, service_name: &str) -> PathBuf {
        self.dir
            .join(format!("{CRON_FILE_PREFIX}{service_name}"))
    }

    /// Installs or updates the job. Unchanged content is not rewritten.
    ///
    /// # Errors
    /// Returns an error if the cron file cannot be read or written.
    pub async fn register(&self, job: &RotationJob) -> anyhow::Result<JobHandle> {
        let path = self.job_path(job.service_name());
        let entry = job.cron_entry(&self.user);

        match fs::read_to_string(&path).await {
            Ok(current) if current == entry => {
                debug!("Rotation job {} already up to date", path.display());
                return Ok(JobHandle {
                    path,
                    changed: false,
                });
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read rotation job {}", path.display())
                });
            }
        }

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cron dir {}", self.dir.display()))?;
        let tmp_path = self
            .dir
            .join(format!(".{CRON_FILE_PREFIX}{}.tmp", job.service_name()));
        fs::write(&tmp_path, &entry)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(CRON_FILE_MODE))
            .await
            .with_context(|| format!("Failed to set permissions on {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to install rotation job {}", path.display()))?;

        info!(
            "Registered rotation job {} ({})",
            path.display(),
            job.schedule()
        );
        Ok(JobHandle {
            path,
            changed: true,
        })
    }

    /// Whether a job file exists for `service_name`.
    ///
    /// # Errors
    /// Returns an error if the cron directory cannot be inspected.
    pub async fn is_registered(&self, service_name: &str) -> anyhow::Result<bool> {
        let path = self.job_path(service_name);
        fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check rotation job {}", path.display()))
    }
}

fn escape_cron_percent(command: &str) -> String {
    command.replace('%', "\\%")
}
