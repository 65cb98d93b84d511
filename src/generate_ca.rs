//! CA Certificate Generation Module
//!
//! Generates the self-signed certificate authority that signs every daemon
//! certificate of an installation.
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Subject**: C, ST, L, O, OU from the settings, CN = installation FQDN
//! - **Basic Constraints**: CA=true
//! - **Subject Alternative Name**: `DNS:<fqdn>`, `email:<admin email>`
//! - **Key Size**: RSA 2048-bit
//! - **Validity**: `years * 365` days from now, no leap-year adjustment
//! - **Signature**: SHA-256 with RSA
//!
//! # Example
//! ```rust,no_run
//! # use anyhow::Result;
//! # use daemon_certs::distinguished_name::SubjectFields;
//! # use daemon_certs::generate_ca::RsaCABuilder;
//! # fn example(subject: SubjectFields) -> Result<()> {
//! let (ca_key, ca_cert) = RsaCABuilder::new(subject)
//!     .common_name("unicore.example.org".to_string())
//!     .email("admin@example.org".to_string())
//!     .validity_years(10)
//!     .serial(1)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::distinguished_name::SubjectFields;
use anyhow::{anyhow, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::X509;

pub(crate) const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
pub(crate) const RSA_KEY_SIZE_DEFAULT: u32 = 2048;
pub(crate) const DAYS_PER_YEAR: u32 = 365;

/// Builder for the RSA key pair and self-signed CA certificate
///
/// The subject fields are fixed at creation and never touched again; later
/// runs load the stored certificate instead of building a new one.
pub struct RsaCABuilder {
    subject: SubjectFields,
    common_name: String,
    email: String,
    validity_years: u32,
    serial: u64,
}

impl RsaCABuilder {
    pub fn new(subject: SubjectFields) -> Self {
        Self {
            subject,
            common_name: String::new(),
            email: String::new(),
            validity_years: 1,
            serial: 1,
        }
    }

    /// Set the CN, the installation's fully qualified host name
    pub fn common_name(mut self, cn: String) -> Self {
        self.common_name = cn;
        self
    }

    /// Contact address placed in the subject alternative name
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

    /// Build the RSA key pair and self-signed CA certificate
    ///
    /// # Errors
    /// Returns error if:
    /// - RSA key generation fails
    /// - A subject field is rejected (e.g. a country code that is not two letters)
    /// - X.509 extension creation fails
    /// - Certificate signing fails
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

        let name = self.subject.to_x509_name(&self.common_name)?;
        builder
            .set_subject_name(&name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_issuer_name(&name)
            .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

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
            .ca()
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(bc)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let san = SubjectAlternativeName::new()
            .dns(&self.common_name)
            .email(&self.email)
            .build(&builder.x509v3_context(None, None))
            .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?;
        builder
            .append_extension(san)
            .map_err(|e| anyhow!("Failed to add SubjectAlternativeName: {}", e))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
        Ok((private_key, builder.build()))
    }
}
