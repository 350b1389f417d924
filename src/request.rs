use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::{CertificateSettings, DEFAULT_LEASE};

const CERT_SUFFIX: &str = ".cert.pem";
const KEY_SUFFIX: &str = ".key.pem";
const LOCK_SUFFIX: &str = ".lock";
const SECS_PER_HOUR: u64 = 60 * 60;

/// Rejection of operator input before any network or file activity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} must be ASCII")]
    NotAscii(&'static str),
    #[error("{0} must not contain whitespace")]
    Whitespace(&'static str),
    #[error("service_name '{0}' may only contain ASCII letters, digits, '-' and '_'")]
    InvalidServiceName(String),
    #[error("{field} '{value}' is not a valid host name")]
    InvalidHostname { field: &'static str, value: String },
    #[error("directory must be an absolute path: {0}")]
    RelativeDirectory(String),
    #[error("domain cannot be derived from host '{0}'; set it explicitly")]
    UnderivableDomain(String),
    #[error("lease '{0}' is not a valid duration")]
    InvalidLease(String),
    #[error("lease '{0}' must be a positive whole number of hours")]
    LeaseNotWholeHours(String),
}

/// Output locations for one certificate/key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub lock: PathBuf,
}

/// One desired certificate, validated and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    service_name: String,
    host: String,
    domain: String,
    aliases: Vec<String>,
    directory: PathBuf,
    lease: Lease,
    vault_addr: Option<String>,
}

impl CertificateRequest {
    /// Builds a request from operator input.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn new(
        service_name: &str,
        host: &str,
        domain: Option<&str>,
        aliases: Vec<String>,
        directory: &str,
        lease: Option<&str>,
        vault_addr: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let service_name = required_word(service_name, "service_name")?;
        // The name becomes a cron.d file name, which must stay unique.
        if !service_name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(ValidationError::InvalidServiceName(service_name));
        }
        let host = required_word(host, "host")?;
        if !host.is_ascii() {
            return Err(ValidationError::NotAscii("host"));
        }
        check_hostname(&host, "host", true)?;

        let domain = match domain.map(str::trim).filter(|d| !d.is_empty()) {
            Some(domain) => {
                let domain = required_word(domain, "domain")?;
                check_hostname(&domain, "domain", false)?;
                domain
            }
            None => derive_domain(&host)?,
        };

        for alias in &aliases {
            if alias.trim().is_empty() {
                return Err(ValidationError::Empty("aliases entry"));
            }
            if alias.contains(char::is_whitespace) {
                return Err(ValidationError::Whitespace("aliases entry"));
            }
            if alias.parse::<Ipv4Addr>().is_err() {
                check_hostname(alias, "aliases entry", true)?;
            }
        }

        let directory = normalize_directory(directory)?;
        let lease = Lease::parse(lease.unwrap_or(DEFAULT_LEASE))?;
        let vault_addr = match vault_addr.map(str::trim).filter(|a| !a.is_empty()) {
            Some(addr) => Some(required_word(addr, "vault_addr")?),
            None => None,
        };

        Ok(Self {
            service_name,
            host,
            domain,
            aliases,
            directory,
            lease,
            vault_addr,
        })
    }

    /// Builds a request from a `[[certificates]]` entry.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn from_settings(cert: &CertificateSettings) -> Result<Self, ValidationError> {
        Self::new(
            &cert.service_name,
            &cert.host,
            cert.domain.as_deref(),
            cert.aliases.clone(),
            &cert.directory,
            cert.lease.as_deref(),
            cert.vault_addr.as_deref(),
        )
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    #[must_use]
    pub fn vault_addr(&self) -> Option<&str> {
        self.vault_addr.as_deref()
    }

    /// Destination paths; always derived from `directory` and `host`.
    #[must_use]
    pub fn paths(&self) -> CertificatePaths {
        CertificatePaths {
            cert: self.directory.join(format!("{}{CERT_SUFFIX}", self.host)),
            key: self.directory.join(format!("{}{KEY_SUFFIX}", self.host)),
            lock: self.directory.join(format!(".{}{LOCK_SUFFIX}", self.host)),
        }
    }

    /// Splits aliases into DNS and IP groups, keeping input order.
    #[must_use]
    pub fn partition_aliases(&self) -> SubjectAltNames {
        partition_aliases(&self.aliases)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    pub dns: Vec<String>,
    pub ip: Vec<String>,
}

#[must_use]
pub fn partition_aliases(aliases: &[String]) -> SubjectAltNames {
    let mut sans = SubjectAltNames::default();
    for alias in aliases {
        if alias.parse::<Ipv4Addr>().is_ok() {
            sans.ip.push(alias.clone());
        } else {
            sans.dns.push(alias.clone());
        }
    }
    sans
}

/// Renewal period, held as whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    hours: u64,
}

impl Lease {
    /// Parses any `humantime` duration that is a whole number of hours.
    ///
    /// # Errors
    /// Returns an error for unparseable, zero, or fractional-hour durations.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        let duration = humantime::parse_duration(trimmed)
            .map_err(|_| ValidationError::InvalidLease(trimmed.to_string()))?;
        let secs = duration.as_secs();
        if secs == 0 || secs % SECS_PER_HOUR != 0 || duration.subsec_nanos() != 0 {
            return Err(ValidationError::LeaseNotWholeHours(trimmed.to_string()));
        }
        Ok(Self {
            hours: secs / SECS_PER_HOUR,
        })
    }

    #[must_use]
    pub fn hours(&self) -> u64 {
        self.hours
    }

    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.hours * SECS_PER_HOUR)
    }
}

impl std::fmt::Display for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}h", self.hours)
    }
}

fn required_word(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if trimmed.contains(char::is_whitespace) {
        return Err(ValidationError::Whitespace(field));
    }
    Ok(trimmed.to_string())
}

/// Letters, digits and inner hyphens per dot-separated label, with an
/// optional leading `*.` when `wildcard` is set.
fn check_hostname(
    value: &str,
    field: &'static str,
    wildcard: bool,
) -> Result<(), ValidationError> {
    let name = match value.strip_prefix("*.") {
        Some(rest) if wildcard => rest,
        _ => value,
    };
    let valid = !name.is_empty()
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidHostname {
            field,
            value: value.to_string(),
        })
    }
}

fn derive_domain(host: &str) -> Result<String, ValidationError> {
    match host.split_once('.') {
        Some((label, rest)) if !label.is_empty() && !rest.is_empty() => Ok(rest.to_string()),
        _ => Err(ValidationError::UnderivableDomain(host.to_string())),
    }
}

fn normalize_directory(directory: &str) -> Result<PathBuf, ValidationError> {
    let trimmed = directory.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("directory"));
    }
    if !trimmed.starts_with('/') {
        return Err(ValidationError::RelativeDirectory(trimmed.to_string()));
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.is_empty() {
        return Ok(PathBuf::from("/"));
    }
    Ok(PathBuf::from(normalized))
}
