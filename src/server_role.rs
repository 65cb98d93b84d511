//! The fixed set of daemons that receive a server certificate.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerRole {
    Gateway,
    Xuudb,
    Unicorex,
    Registry,
    Unity,
    Workflow,
    Servorch,
    Tsi,
}

impl ServerRole {
    /// Every role, in issuance order.
    pub const ALL: [ServerRole; 8] = [
        ServerRole::Gateway,
        ServerRole::Xuudb,
        ServerRole::Unicorex,
        ServerRole::Registry,
        ServerRole::Unity,
        ServerRole::Workflow,
        ServerRole::Servorch,
        ServerRole::Tsi,
    ];

    /// Upper-case role name. Used as the certificate CN and in settings keys.
    pub fn name(self) -> &'static str {
        match self {
            ServerRole::Gateway => "GATEWAY",
            ServerRole::Xuudb => "XUUDB",
            ServerRole::Unicorex => "UNICOREX",
            ServerRole::Registry => "REGISTRY",
            ServerRole::Unity => "UNITY",
            ServerRole::Workflow => "WORKFLOW",
            ServerRole::Servorch => "SERVORCH",
            ServerRole::Tsi => "TSI",
        }
    }

    /// File stem of the role's PKCS#12 bundle.
    pub fn bundle_stem(self) -> String {
        self.name().to_lowercase()
    }

    /// Directory of the daemon under the installation root.
    pub fn daemon_dir(self) -> &'static str {
        match self {
            ServerRole::Gateway => "gateway",
            ServerRole::Xuudb => "xuudb",
            ServerRole::Unicorex => "unicorex",
            ServerRole::Registry => "registry",
            ServerRole::Unity => "unity",
            ServerRole::Workflow => "workflow",
            ServerRole::Servorch => "servorch",
            ServerRole::Tsi => "tsi_selected",
        }
    }

    pub fn domain_key(self) -> String {
        format!("Domains.{}", self.name())
    }

    pub fn passphrase_key(self) -> String {
        format!("KeystorePass.{}", self.name())
    }

    /// Keystore password the daemon ships with out of the box.
    pub fn default_passphrase(self) -> &'static str {
        match self {
            ServerRole::Gateway => "the!gateway",
            ServerRole::Xuudb => "the!xuudb",
            ServerRole::Unicorex => "the!njs",
            ServerRole::Registry => "the!registry",
            ServerRole::Unity => "the!unity",
            ServerRole::Workflow => "the!workflow",
            ServerRole::Servorch => "the!servorch",
            ServerRole::Tsi => "the!tsi",
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names_are_unique() {
        let mut names: Vec<_> = ServerRole::ALL.iter().map(|r| r.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ServerRole::ALL.len());
    }

    #[test]
    fn test_tsi_lives_in_selected_dir_but_keeps_bundle_name() {
        assert_eq!(ServerRole::Tsi.daemon_dir(), "tsi_selected");
        assert_eq!(ServerRole::Tsi.bundle_stem(), "tsi");
        assert_eq!(ServerRole::Unity.domain_key(), "Domains.UNITY");
        assert_eq!(ServerRole::Xuudb.passphrase_key(), "KeystorePass.XUUDB");
    }
}
