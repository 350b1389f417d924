use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use tracing::info;
use x509_parser::extensions::{GeneralName, ParsedExtension};

use crate::request::{CertificatePaths, CertificateRequest};

/// State of an on-disk certificate/key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Either file is missing.
    Missing,
    /// Both files exist and the certificate has expired.
    Expired(time::OffsetDateTime),
    /// Both files exist and the certificate is still valid.
    Valid(time::OffsetDateTime),
}

impl PairState {
    #[must_use]
    pub fn not_after(&self) -> Option<time::OffsetDateTime> {
        match self {
            PairState::Missing => None,
            PairState::Expired(at) | PairState::Valid(at) => Some(*at),
        }
    }
}

/// Inspects the pair at `paths`.
///
/// # Errors
/// Returns an error if the certificate exists but cannot be read or parsed.
pub async fn inspect_pair(paths: &CertificatePaths) -> anyhow::Result<PairState> {
    if !exists(&paths.key).await {
        return Ok(PairState::Missing);
    }
    let cert_bytes = match tokio::fs::read(&paths.cert).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PairState::Missing);
        }
        Err(err) => {
            return Err(anyhow::anyhow!(
                "Failed to read certificate file {}: {err}",
                paths.cert.display()
            ));
        }
    };

    let not_after = parse_cert_not_after(&cert_bytes)?;
    if not_after <= time::OffsetDateTime::now_utc() {
        Ok(PairState::Expired(not_after))
    } else {
        Ok(PairState::Valid(not_after))
    }
}

/// Decides whether immediate issuance must run for `req`.
///
/// A pair is kept only while it is unexpired and was issued for the same
/// host and aliases. An unreadable certificate counts as needing issuance.
pub async fn needs_issuance(req: &CertificateRequest) -> bool {
    let paths = req.paths();
    match inspect_pair(&paths).await {
        Ok(PairState::Valid(not_after)) => match read_issued_names(&paths.cert).await {
            Ok(names) if names.matches(req) => {
                info!(
                    "Certificate {} valid until {not_after}; skipping issuance.",
                    paths.cert.display()
                );
                false
            }
            Ok(names) => {
                info!(
                    "Certificate {} was issued for {names}, not the requested names. Re-issuing.",
                    paths.cert.display()
                );
                true
            }
            Err(err) => {
                info!("{err}. Re-issuing.");
                true
            }
        },
        Ok(PairState::Missing) => true,
        Ok(PairState::Expired(not_after)) => {
            info!(
                "Certificate {} expired at {not_after}. Re-issuing.",
                paths.cert.display()
            );
            true
        }
        Err(err) => {
            info!("{err}. Re-issuing.");
            true
        }
    }
}

/// Subject names found in an issued certificate, lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuedNames {
    pub common_name: Option<String>,
    pub dns: BTreeSet<String>,
    pub ip: BTreeSet<Ipv4Addr>,
}

impl IssuedNames {
    /// True when the certificate names `req.host()` as its common name and
    /// carries exactly the requested aliases. The host itself may also
    /// appear as a DNS SAN.
    #[must_use]
    pub fn matches(&self, req: &CertificateRequest) -> bool {
        let host = req.host().to_ascii_lowercase();
        if self.common_name.as_deref() != Some(host.as_str()) {
            return false;
        }
        let sans = req.partition_aliases();
        let mut wanted_dns: BTreeSet<String> =
            sans.dns.iter().map(|name| name.to_ascii_lowercase()).collect();
        wanted_dns.remove(&host);
        let mut issued_dns = self.dns.clone();
        issued_dns.remove(&host);
        let wanted_ip: BTreeSet<Ipv4Addr> =
            sans.ip.iter().filter_map(|ip| ip.parse().ok()).collect();
        issued_dns == wanted_dns && self.ip == wanted_ip
    }
}

impl std::fmt::Display for IssuedNames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.common_name.iter().cloned().collect();
        names.extend(self.dns.iter().map(|name| format!("DNS:{name}")));
        names.extend(self.ip.iter().map(|ip| format!("IP:{ip}")));
        write!(f, "[{}]", names.join(", "))
    }
}

async fn read_issued_names(cert_path: &Path) -> anyhow::Result<IssuedNames> {
    let bytes = tokio::fs::read(cert_path).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read certificate file {}: {e}",
            cert_path.display()
        )
    })?;
    parse_issued_names(&bytes)
}

/// Extracts the common name and subject alternative names.
///
/// # Errors
/// Returns an error if the certificate cannot be parsed.
pub fn parse_issued_names(cert_bytes: &[u8]) -> anyhow::Result<IssuedNames> {
    let pem = x509_parser::pem::parse_x509_pem(cert_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to parse PEM certificate: {e}"))?
        .1;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse X509 certificate: {e}"))?;

    let mut names = IssuedNames {
        common_name: cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_ascii_lowercase),
        ..IssuedNames::default()
    };
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns) => {
                        names.dns.insert(dns.to_ascii_lowercase());
                    }
                    GeneralName::IPAddress(bytes) => {
                        if let Ok(octets) = <[u8; 4]>::try_from(*bytes) {
                            names.ip.insert(Ipv4Addr::from(octets));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(names)
}

/// Parses the certificate expiration timestamp.
///
/// # Errors
/// Returns an error if the certificate cannot be parsed.
pub fn parse_cert_not_after(cert_bytes: &[u8]) -> anyhow::Result<time::OffsetDateTime> {
    let pem = x509_parser::pem::parse_x509_pem(cert_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to parse PEM certificate: {e}"))?
        .1;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse X509 certificate: {e}"))?;
    Ok(cert.validity().not_after.to_datetime())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::IpAddr;

    use rcgen::string::Ia5String;
    use rcgen::{CertificateParams, DnType, SanType};
    use tempfile::tempdir;
    use time::OffsetDateTime;

    use super::*;

    const HOST: &str = "host.example.com";

    fn request(dir: &Path, aliases: &[&str]) -> CertificateRequest {
        CertificateRequest::new(
            "svc",
            HOST,
            None,
            aliases.iter().map(ToString::to_string).collect(),
            &dir.display().to_string(),
            None,
            None,
        )
        .unwrap()
    }

    fn cert_pem(not_after: OffsetDateTime, sans: &[&str]) -> String {
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, HOST.to_string());
        params.subject_alt_names = sans
            .iter()
            .map(|san| match san.parse::<IpAddr>() {
                Ok(ip) => SanType::IpAddress(ip),
                Err(_) => SanType::DnsName(Ia5String::try_from(san.to_string()).unwrap()),
            })
            .collect();
        params.not_before = OffsetDateTime::now_utc() - time::Duration::days(30);
        params.not_after = not_after;
        let key = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    fn write_pair(paths: &CertificatePaths, not_after: OffsetDateTime, sans: &[&str]) {
        fs::write(&paths.cert, cert_pem(not_after, sans)).unwrap();
        fs::write(&paths.key, "key").unwrap();
    }

    fn in_days(days: i64) -> OffsetDateTime {
        OffsetDateTime::now_utc() + time::Duration::days(days)
    }

    #[tokio::test]
    async fn test_missing_pair() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), &[]);

        assert_eq!(
            inspect_pair(&req.paths()).await.unwrap(),
            PairState::Missing
        );
        assert!(needs_issuance(&req).await);
    }

    #[tokio::test]
    async fn test_missing_key_counts_as_missing() {
        let dir = tempdir().unwrap();
        let paths = request(dir.path(), &[]).paths();
        fs::write(&paths.cert, cert_pem(in_days(5), &[HOST])).unwrap();

        assert_eq!(inspect_pair(&paths).await.unwrap(), PairState::Missing);
    }

    #[tokio::test]
    async fn test_valid_pair_skips_issuance() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), &["alt.example.com", "10.0.0.5"]);
        let not_after = in_days(5);
        write_pair(
            &req.paths(),
            not_after,
            &[HOST, "alt.example.com", "10.0.0.5"],
        );

        let state = inspect_pair(&req.paths()).await.unwrap();

        assert!(matches!(state, PairState::Valid(_)));
        assert_eq!(
            state.not_after().unwrap().unix_timestamp(),
            not_after.unix_timestamp()
        );
        assert!(!needs_issuance(&req).await);
    }

    #[tokio::test]
    async fn test_expired_pair_needs_issuance() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), &[]);
        write_pair(&req.paths(), in_days(-1), &[HOST]);

        assert!(matches!(
            inspect_pair(&req.paths()).await.unwrap(),
            PairState::Expired(_)
        ));
        assert!(needs_issuance(&req).await);
    }

    #[tokio::test]
    async fn test_garbage_cert_needs_issuance() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), &[]);
        let paths = req.paths();
        fs::write(&paths.cert, "not a cert").unwrap();
        fs::write(&paths.key, "key").unwrap();

        let err = inspect_pair(&paths).await.unwrap_err();

        assert!(err.to_string().contains("Failed to parse PEM certificate"));
        assert!(needs_issuance(&req).await);
    }

    #[tokio::test]
    async fn test_changed_aliases_need_issuance() {
        let dir = tempdir().unwrap();
        let before = request(dir.path(), &["alt.example.com"]);
        write_pair(&before.paths(), in_days(5), &[HOST, "alt.example.com"]);
        assert!(!needs_issuance(&before).await);

        let added = request(dir.path(), &["alt.example.com", "new.example.com"]);
        let removed = request(dir.path(), &[]);
        let ip_added = request(dir.path(), &["alt.example.com", "10.0.0.9"]);

        assert!(needs_issuance(&added).await);
        assert!(needs_issuance(&removed).await);
        assert!(needs_issuance(&ip_added).await);
    }

    #[test]
    fn test_parse_issued_names() {
        let pem = cert_pem(in_days(5), &[HOST, "Alt.Example.com", "10.0.0.5"]);

        let names = parse_issued_names(pem.as_bytes()).unwrap();

        assert_eq!(names.common_name.as_deref(), Some(HOST));
        assert!(names.dns.contains("alt.example.com"));
        assert!(names.dns.contains(HOST));
        assert_eq!(
            names.ip.iter().copied().collect::<Vec<_>>(),
            vec![Ipv4Addr::new(10, 0, 0, 5)]
        );
    }

    #[test]
    fn test_names_match_ignores_host_san_and_order() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), &["b.example.com", "a.example.com"]);
        let with_host = parse_issued_names(
            cert_pem(in_days(5), &["a.example.com", HOST, "b.example.com"]).as_bytes(),
        )
        .unwrap();
        let without_host = parse_issued_names(
            cert_pem(in_days(5), &["b.example.com", "a.example.com"]).as_bytes(),
        )
        .unwrap();

        assert!(with_host.matches(&req));
        assert!(without_host.matches(&req));
    }

    #[test]
    fn test_names_match_requires_common_name() {
        let dir = tempdir().unwrap();
        let req = request(dir.path(), &[]);
        let names = IssuedNames {
            common_name: Some("other.example.com".to_string()),
            ..IssuedNames::default()
        };

        assert!(!names.matches(&req));
    }
}
