//! TLS settings derived from a connection's `ssl_mode`.
//!
//! PostgreSQL connections use rustls through `tokio-postgres-rustls`. SQL
//! Server connections use tiberius' own TLS stack and only need an
//! encryption level and a trust flag.

use std::sync::Arc;

use rustls::ClientConfig;
use tiberius::EncryptionLevel;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// Standard libpq `sslmode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    /// Encrypt without verifying the server certificate.
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// `prefer` and `allow` are read as `require`; dbshift never falls back to plaintext.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disable" | "off" | "false" => Ok(SslMode::Disable),
            "" | "require" | "prefer" | "allow" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "invalid ssl_mode '{}' (expected disable, require, verify-ca or verify-full)",
                other
            ))),
        }
    }

    pub fn requires_tls(&self) -> bool {
        *self != SslMode::Disable
    }

    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }

    /// Connector for deadpool-postgres, `None` when TLS is off.
    pub fn postgres_connector(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.requires_tls() {
            warn!("PostgreSQL TLS is disabled; credentials are sent in plaintext");
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.client_config()?)))
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| MigrateError::Config(format!("TLS setup failed: {}", e)))?;

        if !self.verifies_certificate() {
            warn!("ssl_mode=require: traffic is encrypted but the server certificate is not checked");
            return Ok(builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth());
        }

        // rustls always checks the hostname, so verify-ca behaves like verify-full.
        info!("ssl_mode={:?}: verifying server certificate", self);
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Ok(builder.with_root_certificates(roots).with_no_client_auth())
    }

    /// Tiberius encryption level and whether to trust the server certificate.
    pub fn mssql_encryption(&self, trust_server_cert: bool) -> (EncryptionLevel, bool) {
        match self {
            SslMode::Disable => (EncryptionLevel::NotSupported, false),
            SslMode::Require => (EncryptionLevel::Required, true),
            SslMode::VerifyCa | SslMode::VerifyFull => (EncryptionLevel::Required, trust_server_cert),
        }
    }
}

/// Certificate verifier used for `ssl_mode=require`: accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("prefer").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("Verify-Full").unwrap(), SslMode::VerifyFull);
        assert!(SslMode::parse("sometimes").is_err());
    }

    #[test]
    fn test_postgres_connector() {
        assert!(SslMode::Disable.postgres_connector().unwrap().is_none());
        assert!(SslMode::Require.postgres_connector().unwrap().is_some());
        assert!(SslMode::VerifyFull.postgres_connector().unwrap().is_some());
    }

    #[test]
    fn test_mssql_encryption() {
        assert!(matches!(
            SslMode::Disable.mssql_encryption(true),
            (EncryptionLevel::NotSupported, false)
        ));
        assert!(matches!(
            SslMode::VerifyFull.mssql_encryption(false),
            (EncryptionLevel::Required, false)
        ));
        assert!(SslMode::Require.mssql_encryption(false).1);
    }
}
