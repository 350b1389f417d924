// Helper functions are shared across multiple test crates; not every helper is
// referenced in each test module.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rcgen::{CertificateParams, DnType, KeyPair};

/// Writes a self-signed certificate valid for ten days and returns its path.
///
/// The names match the `web` entry that the CLI tests configure.
pub(crate) fn write_fixture_cert(dir: &Path) -> Result<PathBuf> {
    let mut params = CertificateParams::new(vec![
        "web.example.com".to_string(),
        "web2.example.com".to_string(),
        "10.0.0.5".to_string(),
    ])
    .context("Failed to build certificate params")?;
    params
        .distinguished_name
        .push(DnType::CommonName, "web.example.com");
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::days(10);
    let key = KeyPair::generate().context("Failed to generate key")?;
    let cert = params.self_signed(&key).context("Failed to sign fixture cert")?;

    let path = dir.join("fixture.cert.pem");
    fs::write(&path, cert.pem()).context("Failed to write fixture cert")?;
    Ok(path)
}

/// Writes a stand-in for the issuing tool.
///
/// It copies `fixture` to `--certfile`, writes a dummy key to `--keyfile`,
/// and appends its arguments to `calls.log` next to itself.
pub(crate) fn write_fake_issuer(dir: &Path, fixture: &Path) -> Result<PathBuf> {
    let calls = dir.join("calls.log");
    let script = format!(
        r#"#!/bin/sh
set -eu
echo "$*" >> "{calls}"
cert=""
key=""
while [ $# -gt 0 ]; do
  case "$1" in
    --certfile) cert="$2"; shift 2 ;;
    --keyfile) key="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cp "{fixture}" "$cert.tmp"
printf 'KEY\n' > "$key.tmp"
mv -f "$cert.tmp" "$cert"
mv -f "$key.tmp" "$key"
"#,
        calls = calls.display(),
        fixture = fixture.display(),
    );
    let path = dir.join("deploy-ssl-certificate");
    fs::write(&path, script).context("Failed to write fake issuer")?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
        .context("Failed to set fake issuer permissions")?;
    Ok(path)
}

/// Number of times the fake issuer has run.
pub(crate) fn issuer_calls(dir: &Path) -> usize {
    fs::read_to_string(dir.join("calls.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

pub(crate) fn file_mode(path: &Path) -> u32 {
    fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o777)
        .unwrap_or(0)
}
