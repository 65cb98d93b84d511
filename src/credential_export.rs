//! Writes issued credentials in the shape each daemon expects.
//!
//! Every role gets a password-protected PKCS#12 bundle at
//! `<certs>/<role>.p12`. Two roles need more:
//!
//! - **UNITY**: its certificate alone as PEM under `<certs>/unity/` (other
//!   daemons trust it as SAML assertion issuer), plus a copy of the bundle and
//!   the CA certificate inside Unity's own `conf/pki` tree.
//! - **TSI**: certificate, passphrase-encrypted key and CA certificate as
//!   separate PEM files in the TSI configuration directory.

use crate::certificate_authority::{write_file, write_private_pem, IssuedCertificate};
use crate::layout::InstallLayout;
use crate::server_role::ServerRole;
use anyhow::{anyhow, Context, Result};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TSI_CERT_FILE: &str = "tsi-cert.pem";
pub const TSI_KEY_FILE: &str = "tsi-key.pem";
pub const TSI_TRUSTSTORE_FILE: &str = "tsi-truststore.pem";

/// Serialize `key` and `cert` into a PKCS#12 bundle protected by `passphrase`.
fn pkcs12_der(
    key: &PKey<Private>,
    cert: &X509,
    friendly_name: &str,
    passphrase: &SecretString,
) -> Result<Vec<u8>> {
    let bundle = Pkcs12::builder()
        .name(friendly_name)
        .pkey(key)
        .cert(cert)
        .build2(passphrase.expose_secret())
        .map_err(|e| anyhow!("Failed to build PKCS#12 bundle for {}: {}", friendly_name, e))?;
    bundle
        .to_der()
        .map_err(|e| anyhow!("Failed to encode PKCS#12 bundle for {}: {}", friendly_name, e))
}

/// Write a PKCS#12 bundle to `output`, creating parent directories.
pub fn export_bundle(
    key: &PKey<Private>,
    cert: &X509,
    output: &Path,
    friendly_name: &str,
    passphrase: &SecretString,
) -> Result<()> {
    let der = pkcs12_der(key, cert, friendly_name, passphrase)?;
    write_private_pem(output, &der)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Export the standard bundle plus any role-specific layout. Returns every
/// file written.
pub fn export_role_credentials(
    layout: &InstallLayout,
    issued: &IssuedCertificate,
    ca_cert: &X509,
    passphrase: &SecretString,
) -> Result<Vec<PathBuf>> {
    let bundle_path = layout.bundle(issued.role);
    export_bundle(
        &issued.key,
        &issued.cert,
        &bundle_path,
        &issued.role.bundle_stem(),
        passphrase,
    )?;
    let mut written = vec![bundle_path.clone()];

    match issued.role {
        ServerRole::Unity => {
            let unity_pem = layout.unity_cert();
            write_file(&unity_pem, &issued.cert.to_pem()?)?;

            let pki_dir = layout.unity_pki_dir();
            let unity_bundle = pki_dir.join("unity.p12");
            copy_file(&bundle_path, &unity_bundle)?;
            let truststore = pki_dir.join("trusted").join("truststore.pem");
            write_file(&truststore, &ca_cert.to_pem()?)?;

            written.extend([unity_pem, unity_bundle, truststore]);
        }
        ServerRole::Tsi => {
            let conf_dir = layout.conf_dir(ServerRole::Tsi.daemon_dir());
            let truststore = conf_dir.join(TSI_TRUSTSTORE_FILE);
            write_file(&truststore, &ca_cert.to_pem()?)?;

            let cert_path = conf_dir.join(TSI_CERT_FILE);
            write_file(&cert_path, &issued.cert.to_pem()?)?;

            let key_path = conf_dir.join(TSI_KEY_FILE);
            let key_pem = issued
                .key
                .private_key_to_pem_pkcs8_passphrase(
                    Cipher::aes_256_cbc(),
                    passphrase.expose_secret().as_bytes(),
                )
                .map_err(|e| anyhow!("Failed to encrypt TSI private key: {}", e))?;
            write_private_pem(&key_path, &key_pem)?;

            written.extend([truststore, cert_path, key_path]);
        }
        _ => {}
    }

    debug!(role = %issued.role, files = written.len(), "credentials exported");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_authority::{CaParams, CertificateAuthority, ServerIdentity};
    use crate::distinguished_name::SubjectFields;
    use crate::serial::SerialCounter;

    fn layout(root: &Path) -> InstallLayout {
        InstallLayout {
            ca_dir: root.join("ca"),
            cert_dir: root.join("certs"),
            unicore_dir: root.join("unicore"),
            support_dir: root.join("support"),
        }
    }

    fn issue(layout: &InstallLayout, role: ServerRole) -> (CertificateAuthority, IssuedCertificate) {
        let subject = SubjectFields {
            country: "DE".to_string(),
            state: "BW".to_string(),
            locality: "Karlsruhe".to_string(),
            organization: "Example Organization".to_string(),
            organizational_unit: "IT Services".to_string(),
        };
        let params = CaParams {
            subject: subject.clone(),
            fqdn: "unicore.example.org".to_string(),
            admin_email: "admin@example.org".to_string(),
            validity_years: 1,
        };
        let mut serial = SerialCounter::new();
        let ca = CertificateAuthority::bootstrap_or_load(layout, &params, &mut serial)
            .unwrap()
            .ca;
        let identity = ServerIdentity {
            role,
            fqdn: "host.example.org".to_string(),
            admin_email: "admin@example.org".to_string(),
            validity_years: 1,
            passphrase: SecretString::from("pw".to_string()),
        };
        let issued = ca
            .issue_server_certificate(&identity, &subject, &mut serial)
            .unwrap();
        (ca, issued)
    }

    #[test]
    fn test_bundle_round_trips_with_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let (ca, issued) = issue(&layout, ServerRole::Gateway);
        let pass = SecretString::from("pw".to_string());

        let written = export_role_credentials(&layout, &issued, ca.certificate(), &pass).unwrap();
        assert_eq!(written, vec![layout.bundle(ServerRole::Gateway)]);

        let der = fs::read(layout.bundle(ServerRole::Gateway)).unwrap();
        let parsed = Pkcs12::from_der(&der).unwrap().parse2("pw").unwrap();
        assert_eq!(
            parsed.cert.unwrap().to_pem().unwrap(),
            issued.cert.to_pem().unwrap()
        );
        assert!(parsed.pkey.unwrap().public_eq(&issued.key));
        assert!(Pkcs12::from_der(&der).unwrap().parse2("wrong").is_err());
    }

    #[test]
    fn test_unity_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let (ca, issued) = issue(&layout, ServerRole::Unity);
        let pass = SecretString::from("pw".to_string());

        export_role_credentials(&layout, &issued, ca.certificate(), &pass).unwrap();

        assert_eq!(fs::read(layout.unity_cert()).unwrap(), issued.cert.to_pem().unwrap());
        let pki = layout.unity_pki_dir();
        assert_eq!(
            fs::read(pki.join("unity.p12")).unwrap(),
            fs::read(layout.bundle(ServerRole::Unity)).unwrap()
        );
        assert_eq!(
            fs::read(pki.join("trusted").join("truststore.pem")).unwrap(),
            ca.certificate().to_pem().unwrap()
        );
    }

    #[test]
    fn test_tsi_layout_encrypts_key() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let (ca, issued) = issue(&layout, ServerRole::Tsi);
        let pass = SecretString::from("pw".to_string());

        export_role_credentials(&layout, &issued, ca.certificate(), &pass).unwrap();

        let conf = layout.conf_dir("tsi_selected");
        assert_eq!(fs::read(conf.join(TSI_CERT_FILE)).unwrap(), issued.cert.to_pem().unwrap());
        assert_eq!(
            fs::read(conf.join(TSI_TRUSTSTORE_FILE)).unwrap(),
            ca.certificate().to_pem().unwrap()
        );
        let key_pem = fs::read(conf.join(TSI_KEY_FILE)).unwrap();
        assert!(PKey::private_key_from_pem_passphrase(&key_pem, b"wrong").is_err());
        let key = PKey::private_key_from_pem_passphrase(&key_pem, b"pw").unwrap();
        assert!(key.public_eq(&issued.key));
        assert!(layout.bundle(ServerRole::Tsi).is_file());
    }

    #[test]
    fn test_reexport_is_idempotent_on_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let (ca, issued) = issue(&layout, ServerRole::Unity);
        let pass = SecretString::from("pw".to_string());
        export_role_credentials(&layout, &issued, ca.certificate(), &pass).unwrap();
        export_role_credentials(&layout, &issued, ca.certificate(), &pass).unwrap();
    }
}
