use std::collections::BTreeSet;

use anyhow::Result;

use super::{CertificateSettings, IssuerSettings, RotationSettings, Settings, VaultSettings};

pub(crate) fn validate_settings(settings: &Settings) -> Result<()> {
    validate_vault_settings(&settings.vault)?;
    validate_issuer_settings(&settings.issuer)?;
    validate_rotation_settings(&settings.rotation)?;

    let mut seen = BTreeSet::new();
    for cert in &settings.certificates {
        validate_certificate(cert, &settings.rotation)?;
        if !seen.insert(cert.service_name.as_str()) {
            anyhow::bail!(
                "certificates: duplicate service_name '{}'",
                cert.service_name
            );
        }
    }
    Ok(())
}

fn validate_vault_settings(vault: &VaultSettings) -> Result<()> {
    let addr = vault.addr.trim();
    if addr.is_empty() {
        anyhow::bail!("vault.addr must not be empty");
    }
    if !addr.starts_with("https://") && !addr.starts_with("http://") {
        anyhow::bail!("vault.addr must start with http:// or https://");
    }
    if vault.auth_backend.trim().is_empty() {
        anyhow::bail!("vault.auth_backend must not be empty");
    }
    if vault.auth_backend.contains('/') {
        anyhow::bail!("vault.auth_backend must be a single path segment");
    }
    if vault.connect_timeout_secs == 0 {
        anyhow::bail!("vault.connect_timeout_secs must be greater than 0");
    }
    if vault.read_timeout_secs == 0 {
        anyhow::bail!("vault.read_timeout_secs must be greater than 0");
    }
    if let Some(path) = &vault.ca_bundle_path
        && path.as_os_str().is_empty()
    {
        anyhow::bail!("vault.ca_bundle_path must not be empty");
    }
    Ok(())
}

fn validate_issuer_settings(issuer: &IssuerSettings) -> Result<()> {
    if issuer.command.trim().is_empty() {
        anyhow::bail!("issuer.command must not be empty");
    }
    let flag = issuer.domain_flag.trim();
    if flag.is_empty() {
        anyhow::bail!("issuer.domain_flag must not be empty");
    }
    if flag.starts_with('-') {
        anyhow::bail!("issuer.domain_flag must be given without leading dashes");
    }
    if issuer.timeout_secs == 0 {
        anyhow::bail!("issuer.timeout_secs must be greater than 0");
    }
    if let Some(max_output_bytes) = issuer.max_output_bytes
        && max_output_bytes == 0
    {
        anyhow::bail!("issuer.max_output_bytes must be greater than 0");
    }
    Ok(())
}

fn validate_rotation_settings(rotation: &RotationSettings) -> Result<()> {
    if !rotation.cron_dir.is_absolute() {
        anyhow::bail!("rotation.cron_dir must be an absolute path");
    }
    if rotation.user.trim().is_empty() || rotation.user.contains(char::is_whitespace) {
        anyhow::bail!("rotation.user must be a single non-empty word");
    }
    if let Some(schedule) = &rotation.schedule {
        crate::rotation::validate_schedule(schedule)
            .map_err(|err| anyhow::anyhow!("rotation.schedule is invalid: {err}"))?;
    }
    Ok(())
}

fn validate_certificate(cert: &CertificateSettings, rotation: &RotationSettings) -> Result<()> {
    // Full request validation happens when the request is built; catching the
    // cheap cases here reports every bad entry at load time.
    let req = crate::request::CertificateRequest::from_settings(cert)
        .map_err(|err| anyhow::anyhow!("certificates[{}]: {err}", cert.service_name))?;
    if rotation.schedule.is_none() {
        crate::rotation::schedule_for_lease(req.lease())
            .map_err(|err| anyhow::anyhow!("certificates[{}]: {err}", cert.service_name))?;
    }
    Ok(())
}
