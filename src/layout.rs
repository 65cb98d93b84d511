//! Filesystem layout of an installation.

use crate::server_role::ServerRole;
use crate::settings::ConfigStore;
use anyhow::Result;
use std::path::PathBuf;

/// Name of the persisted serial counter inside the CA directory.
pub const SERIAL_FILE: &str = "serial";
pub const CA_CERT_FILE: &str = "cacert.pem";
pub const CA_KEY_FILE: &str = "cakey.pem";
pub const XUUDB_COMMANDS_FILE: &str = "xuudb_commands.sh";
pub const DN_LIST_FILE: &str = "rfc4514_dns.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub ca_dir: PathBuf,
    pub cert_dir: PathBuf,
    pub unicore_dir: PathBuf,
    pub support_dir: PathBuf,
}

impl InstallLayout {
    pub fn from_settings(settings: &ConfigStore) -> Result<Self> {
        Ok(Self {
            ca_dir: PathBuf::from(settings.get("directory.ca")?),
            cert_dir: PathBuf::from(settings.get("directory.certs")?),
            unicore_dir: PathBuf::from(settings.get("directory.unicore")?),
            support_dir: PathBuf::from(settings.get("directory.support")?),
        })
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILE)
    }

    pub fn ca_key(&self) -> PathBuf {
        self.ca_dir.join("private").join(CA_KEY_FILE)
    }

    pub fn trust_dir(&self) -> PathBuf {
        self.cert_dir.join("trusted")
    }

    pub fn bundle(&self, role: ServerRole) -> PathBuf {
        self.cert_dir.join(format!("{}.p12", role.bundle_stem()))
    }

    /// Where other daemons pick up the Unity certificate as a trusted SAML issuer.
    pub fn unity_cert(&self) -> PathBuf {
        self.cert_dir.join("unity").join("unity.pem")
    }

    /// `{installRoot}/{daemon}/conf`
    pub fn conf_dir(&self, daemon: &str) -> PathBuf {
        self.unicore_dir.join(daemon).join("conf")
    }

    /// `{installRoot}/{daemon}/conf/{filename}`
    pub fn conf_file(&self, daemon: &str, filename: &str) -> PathBuf {
        self.conf_dir(daemon).join(filename)
    }

    pub fn role_conf_file(&self, role: ServerRole, filename: &str) -> PathBuf {
        self.conf_file(role.daemon_dir(), filename)
    }

    pub fn unity_pki_dir(&self) -> PathBuf {
        self.conf_dir(ServerRole::Unity.daemon_dir()).join("pki")
    }

    pub fn support_file(&self, name: &str) -> PathBuf {
        self.support_dir.join(name)
    }
}
