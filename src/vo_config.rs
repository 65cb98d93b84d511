//! VO configuration documents.
//!
//! Each service behind the gateway gets a `vo.config` telling it to pull user
//! attributes from the Unity IdP, to accept pushed assertions, and to trust
//! assertions signed with the Unity certificate.

use crate::certificate_authority::write_file;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const TEMPLATE: &str = "\
# VO attribute source configuration for {component}
# Generated file. Rerunning the provisioning tool overwrites it.

# Group of the VO this service accepts members of
vo.group=/vo.unicore

# URI of the Unity IdP that issues attribute assertions
vo.voServerURI=https://{unity}:2443/unicore-soapidp/saml2unicoreidp-soap/AuthenticationService

# How this service identifies itself when querying Unity
vo.localServerURI=https://{gateway}:8080/{component}

# Assertions are trusted when signed with the Unity certificate
vo.truststore.type=directory
vo.truststore.directoryLocations.1={unity_pem}

# Pull mode
vo.pull.enable=true
vo.pull.voServerURL=https://{unity}:2443/unicore-soapaa/saml2unicoreidp-soap/AssertionQueryService
vo.pull.cacheTtl=20
vo.pull.verifySignatures=false
vo.pull.disableIfAttributesWereSet=true

# Push mode
vo.push.enable=true
vo.push.disableIfAttributesWereSet=true
";

/// Parameters of one `vo.config`.
#[derive(Debug, Clone)]
pub struct VoConfig {
    /// Absolute path of the Unity certificate PEM.
    pub unity_pem: PathBuf,
    pub component: String,
    pub unity_fqdn: String,
    pub gateway_fqdn: String,
}

impl VoConfig {
    /// Resolve `unity_pem` to an absolute path. The file must already exist.
    pub fn new(unity_pem: &Path, component: &str, unity_fqdn: &str, gateway_fqdn: &str) -> Result<Self> {
        let unity_pem = fs::canonicalize(unity_pem)
            .with_context(|| format!("Failed to resolve Unity certificate {}", unity_pem.display()))?;
        Ok(Self {
            unity_pem,
            component: component.to_string(),
            unity_fqdn: unity_fqdn.to_string(),
            gateway_fqdn: gateway_fqdn.to_string(),
        })
    }

    pub fn render(&self) -> String {
        TEMPLATE
            .replace("{component}", &self.component)
            .replace("{unity_pem}", &self.unity_pem.display().to_string())
            .replace("{unity}", &self.unity_fqdn)
            .replace("{gateway}", &self.gateway_fqdn)
    }

    /// Write (overwriting) the document to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_file(path, self.render().as_bytes())?;
        debug!(file = %path.display(), component = %self.component, "VO config written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_every_parameter() {
        let config = VoConfig {
            unity_pem: PathBuf::from("/srv/certs/unity/unity.pem"),
            component: "DEMO-SITE".to_string(),
            unity_fqdn: "idp.example.org".to_string(),
            gateway_fqdn: "gw.example.org".to_string(),
        };
        let text = config.render();
        assert!(text.contains("vo.truststore.directoryLocations.1=/srv/certs/unity/unity.pem\n"));
        assert!(text.contains("vo.localServerURI=https://gw.example.org:8080/DEMO-SITE\n"));
        assert!(text.contains("https://idp.example.org:2443/unicore-soapaa/"));
        assert!(!text.contains('{'));
    }

    #[test]
    fn test_write_resolves_absolute_pem_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let pem = dir.path().join("unity.pem");
        fs::write(&pem, "pem").unwrap();
        let target = dir.path().join("registry").join("conf").join("vo.config");

        let config = VoConfig::new(&pem, "REGISTRY", "idp", "gw").unwrap();
        assert!(config.unity_pem.is_absolute());
        config.write_to(&target).unwrap();
        config.write_to(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), config.render());
    }

    #[test]
    fn test_missing_pem_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VoConfig::new(&dir.path().join("absent.pem"), "X", "u", "g").is_err());
    }
}
