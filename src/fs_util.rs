use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Result;
use tokio::fs;

pub const CERT_FILE_MODE: u32 = 0o444;
pub const KEY_FILE_MODE: u32 = 0o400;
const CERT_DIR_MODE: u32 = 0o755;

/// Creates the output directory if it is missing.
///
/// Existing directories keep their permissions; only a freshly created one
/// gets `0755`.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub async fn ensure_output_dir(path: &Path) -> Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create output dir {}: {e}", path.display()))?;
    fs::set_permissions(path, std::fs::Permissions::from_mode(CERT_DIR_MODE))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to set output dir permissions: {e}"))?;
    Ok(())
}

/// Applies `0444` to the certificate and `0400` to the key.
///
/// # Errors
/// Returns an error if either file is missing or permissions cannot be set.
pub async fn enforce_pair_permissions(cert_path: &Path, key_path: &Path) -> Result<()> {
    set_mode(cert_path, CERT_FILE_MODE, "certificate").await?;
    set_mode(key_path, KEY_FILE_MODE, "key").await?;
    Ok(())
}

/// Returns the permission bits of `path`, or `None` if it does not exist.
///
/// # Errors
/// Returns an error if the metadata cannot be read for another reason.
pub async fn file_mode(path: &Path) -> Result<Option<u32>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.permissions().mode() & 0o777)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow::anyhow!(
            "Failed to read metadata for {}: {err}",
            path.display()
        )),
    }
}

async fn set_mode(path: &Path, mode: u32, label: &str) -> Result<()> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!("Expected {label} file {} was not written", path.display());
    }
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to set {label} file permissions on {}: {e}",
                path.display()
            )
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_ensure_output_dir_creates_missing() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("ssl").join("certs");

        ensure_output_dir(&out).await.unwrap();

        let mode = std::fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, CERT_DIR_MODE);
    }

    #[tokio::test]
    async fn test_ensure_output_dir_keeps_existing_mode() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("private");
        std::fs::create_dir(&out).unwrap();
        std::fs::set_permissions(&out, std::fs::Permissions::from_mode(0o700)).unwrap();

        ensure_output_dir(&out).await.unwrap();

        let mode = std::fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[tokio::test]
    async fn test_enforce_pair_permissions() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("host.cert.pem");
        let key = dir.path().join("host.key.pem");
        fs::write(&cert, "cert-data").await.unwrap();
        fs::write(&key, "key-data").await.unwrap();

        enforce_pair_permissions(&cert, &key).await.unwrap();

        assert_eq!(file_mode(&cert).await.unwrap(), Some(CERT_FILE_MODE));
        assert_eq!(file_mode(&key).await.unwrap(), Some(KEY_FILE_MODE));
    }

    #[tokio::test]
    async fn test_enforce_pair_permissions_is_repeatable() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("host.cert.pem");
        let key = dir.path().join("host.key.pem");
        fs::write(&cert, "cert-data").await.unwrap();
        fs::write(&key, "key-data").await.unwrap();

        enforce_pair_permissions(&cert, &key).await.unwrap();
        enforce_pair_permissions(&cert, &key).await.unwrap();

        assert_eq!(file_mode(&cert).await.unwrap(), Some(CERT_FILE_MODE));
        assert_eq!(file_mode(&key).await.unwrap(), Some(KEY_FILE_MODE));
    }

    #[tokio::test]
    async fn test_enforce_pair_permissions_missing_key() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("host.cert.pem");
        fs::write(&cert, "cert-data").await.unwrap();

        let err = enforce_pair_permissions(&cert, &dir.path().join("host.key.pem"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Expected key file"));
    }

    #[tokio::test]
    async fn test_file_mode_missing_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(file_mode(&dir.path().join("nope")).await.unwrap(), None);
    }
}
