//! The installation CA: created once, loaded on every later run.
//!
//! Presence of `<ca_dir>/cacert.pem` decides between the two. A loaded CA is
//! trusted as-is; expiry, key/certificate match and tampering are not checked.

use crate::distinguished_name::{render_rfc4514, SubjectFields};
use crate::generate_ca::RsaCABuilder;
use crate::generate_server_cert::RsaServerCertBuilder;
use crate::layout::InstallLayout;
use crate::serial::SerialCounter;
use crate::server_role::ServerRole;
use crate::settings::ConfigStore;
use anyhow::{Context, Result};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::SecretString;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Parameters fixed into the CA certificate when it is first created.
#[derive(Debug, Clone)]
pub struct CaParams {
    pub subject: SubjectFields,
    pub fqdn: String,
    pub admin_email: String,
    pub validity_years: u32,
}

impl CaParams {
    pub fn from_settings(settings: &ConfigStore) -> Result<Self> {
        Ok(Self {
            subject: SubjectFields::from_settings(settings)?,
            fqdn: settings.get("FQDN")?.to_string(),
            admin_email: settings.get("cert.email")?.to_string(),
            validity_years: settings.get_u32("cert.years")?,
        })
    }
}

/// Everything needed to issue and export one daemon's certificate.
#[derive(Debug)]
pub struct ServerIdentity {
    pub role: ServerRole,
    pub fqdn: String,
    pub admin_email: String,
    pub validity_years: u32,
    pub passphrase: SecretString,
}

impl ServerIdentity {
    pub fn from_settings(role: ServerRole, settings: &ConfigStore) -> Result<Self> {
        Ok(Self {
            role,
            fqdn: settings.get(&role.domain_key())?.to_string(),
            admin_email: settings.get("cert.email")?.to_string(),
            validity_years: settings.get_u32("cert.years")?,
            passphrase: SecretString::from(settings.get(&role.passphrase_key())?.to_string()),
        })
    }
}

/// A freshly issued server key and certificate, held in memory only.
pub struct IssuedCertificate {
    pub role: ServerRole,
    pub serial: u64,
    pub dn: String,
    pub key: PKey<Private>,
    pub cert: X509,
}

pub struct CertificateAuthority {
    key: PKey<Private>,
    cert: X509,
}

/// Outcome of [`CertificateAuthority::bootstrap_or_load`].
pub struct CaBootstrap {
    pub ca: CertificateAuthority,
    pub created: bool,
}

impl CertificateAuthority {
    /// Load the CA from `layout`, creating and persisting a new one if
    /// `cacert.pem` does not exist yet. Only creation consumes a serial.
    pub fn bootstrap_or_load(
        layout: &InstallLayout,
        params: &CaParams,
        serial: &mut SerialCounter,
    ) -> Result<CaBootstrap> {
        if layout.ca_cert().is_file() {
            let ca = Self::load(layout)?;
            info!(dn = %ca.dn()?, "loaded existing CA");
            return Ok(CaBootstrap { ca, created: false });
        }

        let serial_number = serial.next()?;
        let (key, cert) = RsaCABuilder::new(params.subject.clone())
            .common_name(params.fqdn.clone())
            .email(params.admin_email.clone())
            .validity_years(params.validity_years)
            .serial(serial_number)
            .build()
            .context("Failed to generate CA")?;
        let ca = Self { key, cert };
        ca.persist(layout)?;
        info!(serial = serial_number, dn = %ca.dn()?, "created new CA");
        Ok(CaBootstrap { ca, created: true })
    }

    /// Read `private/cakey.pem` and `cacert.pem` from the CA directory.
    pub fn load(layout: &InstallLayout) -> Result<Self> {
        let key_path = layout.ca_key();
        let key_pem = fs::read(&key_path)
            .with_context(|| format!("Failed to read CA key {}", key_path.display()))?;
        let key = PKey::private_key_from_pem(&key_pem)
            .with_context(|| format!("Failed to parse CA key {}", key_path.display()))?;

        let cert_path = layout.ca_cert();
        let cert_pem = fs::read(&cert_path)
            .with_context(|| format!("Failed to read CA certificate {}", cert_path.display()))?;
        let cert = X509::from_pem(&cert_pem)
            .with_context(|| format!("Failed to parse CA certificate {}", cert_path.display()))?;

        Ok(Self { key, cert })
    }

    fn persist(&self, layout: &InstallLayout) -> Result<()> {
        let key_path = layout.ca_key();
        write_private_pem(&key_path, &self.key.private_key_to_pem_pkcs8()?)?;

        let cert_pem = self.cert.to_pem()?;
        write_file(&layout.ca_cert(), &cert_pem)?;
        write_file(&layout.trust_dir().join("cacert.pem"), &cert_pem)?;
        debug!(key = %key_path.display(), "CA key and certificate written");
        Ok(())
    }

    /// Issue a certificate for `identity`, consuming exactly one serial.
    pub fn issue_server_certificate(
        &self,
        identity: &ServerIdentity,
        subject: &SubjectFields,
        serial: &mut SerialCounter,
    ) -> Result<IssuedCertificate> {
        let serial_number = serial.next()?;
        let (key, cert) = RsaServerCertBuilder::new(&self.key, &self.cert, subject.clone())
            .common_name(identity.role.name().to_string())
            .fqdn(identity.fqdn.clone())
            .email(identity.admin_email.clone())
            .validity_years(identity.validity_years)
            .serial(serial_number)
            .build()
            .with_context(|| format!("Failed to issue certificate for {}", identity.role))?;
        let dn = render_rfc4514(cert.subject_name())?;
        debug!(role = %identity.role, serial = serial_number, dn = %dn, "issued server certificate");
        Ok(IssuedCertificate {
            role: identity.role,
            serial: serial_number,
            dn,
            key,
            cert,
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    pub fn dn(&self) -> Result<String> {
        render_rfc4514(self.cert.subject_name())
    }
}

pub(crate) fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Like [`write_file`] but restricts the file to its owner on Unix.
pub(crate) fn write_private_pem(path: &Path, contents: &[u8]) -> Result<()> {
    write_file(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions of {}", path.display()))?;
    }
    Ok(())
}
