//! Server Certificate Generation Module
//!
//! Generates daemon certificates signed by the installation CA. The CN is the
//! role name (`GATEWAY`, `UNITY`, ...); the daemon's host name is carried in
//! the subject alternative name.
//!
//! # X.509 Extensions
//! - **Basic Constraints**: CA=false
//! - **Extended Key Usage**: `serverAuth`, `clientAuth` (daemons talk to each other
//!   over mutually authenticated TLS)
//! - **Subject Alternative Name**: `DNS:<daemon fqdn>`, `email:<admin email>`
//!
//! Certificates are signed with SHA-256.

use crate::distinguished_name::SubjectFields;
use crate::generate_ca::{DAYS_PER_YEAR, RSA_KEY_SIZE_DEFAULT, X509_VERSION_3};
use anyhow::{anyhow, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Ref, X509};

/// Builder for RSA key pairs and server certificates signed by the CA
///
/// # Examples
/// ```rust,no_run
/// # use anyhow::Result;
/// # use openssl::pkey::{PKey, Private};
/// # use openssl::x509::X509;
/// # use daemon_certs::distinguished_name::SubjectFields;
/// # use daemon_certs::generate_server_cert::RsaServerCertBuilder;
/// # fn example(ca_key: PKey<Private>, ca_cert: X509, subject: SubjectFields) -> Result<()> {
/// let (server_key, server_cert) = RsaServerCertBuilder::new(&ca_key, &ca_cert, subject)
///     .common_name("GATEWAY".to_string())
///     .fqdn("gateway.example.org".to_string())
///     .email("admin@example.org".to_string())
///     .validity_years(3)
///     .serial(2)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RsaServerCertBuilder<'a> {
    subject: SubjectFields,
    common_name: String,
    fqdn: String,
    email: String,
    validity_years: u32,
    serial: u64,
    signing_key: &'a PKey<Private>,
    signing_cert: &'a X509Ref,
}

impl<'a> RsaServerCertBuilder<'a> {
    /// Create a builder that signs with the given CA key and names the CA
    /// certificate's subject as issuer.
    pub fn new(ca_key: &'a PKey<Private>, ca_cert: &'a X509Ref, subject: SubjectFields) -> Self {
        Self {
            subject,
            common_name: String::new(),
            fqdn: String::new(),
            email: String::new(),
            validity_years: 1,
            serial: 1,
            signing_key: ca_key,
            signing_cert: ca_cert,
        }
    }

    pub fn common_name(mut self, cn: String) -> Self {
        self.common_name = cn;
        self
    }

    /// Host name of the daemon, placed in the subject alternative name
    pub fn fqdn(mut self, fqdn: String) -> Self {
        self.fqdn = fqdn;
        self
    }

    pub fn email(mut self, email: String) -> Self {
        self.email = email;
        self
    }

    pub fn validity_years(mut self, years: u32) -> Self {
        self.validity_years = years;
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Build the RSA key pair and the CA-signed server certificate
    pub fn build(self) -> Result<(PKey<Private>, X509)> {
        let rsa = openssl::rsa::Rsa::generate(RSA_KEY_SIZE_DEFAULT)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        let serial = BigNum::from_slice(&self.serial.to_be_bytes())?.to_asn1_integer()?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| anyhow!("Failed to set serial number {}: {}", self.serial, e))?;

        let subject_name = self.subject.to_x509_name(&self.common_name)?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_issuer_name(self.signing_cert.subject_name())
            .map_err(|e| anyhow!("Failed to set issuer from CA: {}", e))?;

        let not_before =
            Asn1Time::days_from_now(0).map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        let not_after = Asn1Time::days_from_now(self.validity_years * DAYS_PER_YEAR)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&private_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        let bc = BasicConstraints::new()
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(bc)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let eku = ExtendedKeyUsage::new()
            .server_auth()
            .client_auth()
            .build()
            .map_err(|e| anyhow!("Failed to build ExtendedKeyUsage: {}", e))?;
        builder
            .append_extension(eku)
            .map_err(|e| anyhow!("Failed to add ExtendedKeyUsage: {}", e))?;

        let san = SubjectAlternativeName::new()
            .dns(&self.fqdn)
            .email(&self.email)
            .build(&builder.x509v3_context(Some(self.signing_cert), None))
            .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?;
        builder
            .append_extension(san)
            .map_err(|e| anyhow!("Failed to add SubjectAlternativeName: {}", e))?;

        builder
            .sign(self.signing_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
        Ok((private_key, builder.build()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distinguished_name::render_rfc4514;
    use crate::generate_ca::RsaCABuilder;

    fn subject() -> SubjectFields {
        SubjectFields {
            country: "DE".to_string(),
            state: "BW".to_string(),
            locality: "Karlsruhe".to_string(),
            organization: "Example Organization".to_string(),
            organizational_unit: "IT Services".to_string(),
        }
    }

    #[test]
    fn test_server_cert_signed_by_ca() {
        let (ca_key, ca_cert) = RsaCABuilder::new(subject())
            .common_name("unicore.example.org".to_string())
            .email("admin@example.org".to_string())
            .build()
            .unwrap();

        let (key, cert) = RsaServerCertBuilder::new(&ca_key, &ca_cert, subject())
            .common_name("GATEWAY".to_string())
            .fqdn("gateway.example.org".to_string())
            .email("admin@example.org".to_string())
            .validity_years(3)
            .serial(42)
            .build()
            .unwrap();

        assert!(cert.verify(&ca_key).unwrap());
        assert!(cert.public_key().unwrap().public_eq(&key));
        assert_eq!(
            render_rfc4514(cert.issuer_name()).unwrap(),
            render_rfc4514(ca_cert.subject_name()).unwrap()
        );
        assert!(render_rfc4514(cert.subject_name())
            .unwrap()
            .starts_with("CN=GATEWAY,"));
        let dns: Vec<_> = cert
            .subject_alt_names()
            .unwrap()
            .iter()
            .filter_map(|n| n.dnsname().map(str::to_string))
            .collect();
        assert_eq!(dns, vec!["gateway.example.org".to_string()]);
        assert_eq!(
            cert.serial_number().to_bn().unwrap().to_dec_str().unwrap().to_string(),
            "42"
        );
    }
}
