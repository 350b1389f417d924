use std::fmt;

use crate::config::IssuerSettings;
use crate::request::CertificateRequest;

const DNS_PREFIX: &str = "DNS:";
const IP_PREFIX: &str = "IP:";
const SAN_SEPARATOR: &str = ", ";
const ENV_PROGRAM: &str = "env";
const VAULT_ADDR_ENV: &str = "VAULT_ADDR";

/// A program invocation held as an argument vector.
///
/// It is only flattened into a shell string through [`fmt::Display`], for
/// logs and cron entries; process spawning uses the vector directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Prepends `wrapper` so that it runs this command as its trailing args.
    #[must_use]
    pub fn wrapped_by(&self, wrapper: CommandLine) -> Self {
        let mut args = wrapper.args;
        args.push(self.program.clone());
        args.extend(self.args.iter().cloned());
        Self {
            program: wrapper.program,
            args,
        }
    }

    /// Prefixes the command with `env VAULT_ADDR=<addr>`.
    #[must_use]
    pub fn with_vault_addr(&self, addr: &str) -> Self {
        self.wrapped_by(CommandLine::new(ENV_PROGRAM).arg(format!("{VAULT_ADDR_ENV}={addr}")))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            f.write_str(" ")?;
            f.write_str(&shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Builds the issuing tool invocation for `req`.
///
/// The argument order is fixed: role/domain, common name, DNS SANs, IP SANs,
/// lease, then the two output files.
#[must_use]
pub fn build_issuance_command(req: &CertificateRequest, issuer: &IssuerSettings) -> CommandLine {
    let sans = req.partition_aliases();
    let paths = req.paths();

    let mut cmd = CommandLine::new(issuer.command.trim())
        .arg(format!("--{}", issuer.domain_flag.trim()))
        .arg(req.domain())
        .arg("--common_name")
        .arg(req.host());
    if let Some(alt_names) = format_san_list(&sans.dns, DNS_PREFIX) {
        cmd = cmd.arg("--alt_names").arg(alt_names);
    }
    if let Some(ip_sans) = format_san_list(&sans.ip, IP_PREFIX) {
        cmd = cmd.arg("--ip_sans").arg(ip_sans);
    }
    cmd.arg("--lease")
        .arg(req.lease().to_string())
        .arg("--certfile")
        .arg(paths.cert.display().to_string())
        .arg("--keyfile")
        .arg(paths.key.display().to_string())
}

fn format_san_list(entries: &[String], prefix: &str) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .map(|entry| format!("{prefix}{entry}"))
            .collect::<Vec<_>>()
            .join(SAN_SEPARATOR),
    )
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "@%+=:,./_-".contains(ch));
    if safe {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}
