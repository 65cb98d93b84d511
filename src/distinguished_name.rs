//! Subject names and their string form.
//!
//! Subjects are built in the order C, ST, L, O, OU, CN. The rendered form lists
//! the components in reverse, CN first, joined by commas:
//!
//! ```text
//! CN=UNITY,OU=IT Services,O=Example Organization,L=Karlsruhe,ST=BW,C=DE
//! ```
//!
//! Special characters are not escaped as RFC 4514 section 2.4 would require.
//! Downstream registration commands consume the DNs in this exact form.

use crate::settings::ConfigStore;
use anyhow::{anyhow, Result};
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};

/// The organisational part of every subject issued by the CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFields {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

impl SubjectFields {
    pub fn from_settings(settings: &ConfigStore) -> Result<Self> {
        Ok(Self {
            country: settings.get("cert.Country")?.to_string(),
            state: settings.get("cert.State")?.to_string(),
            locality: settings.get("cert.Locality")?.to_string(),
            organization: settings.get("cert.Organization")?.to_string(),
            organizational_unit: settings.get("cert.OrganizationalUnit")?.to_string(),
        })
    }

    /// Build an X.509 name from these fields with `common_name` as CN.
    pub fn to_x509_name(&self, common_name: &str) -> Result<X509Name> {
        let mut name_builder =
            X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        let entries = [
            (Nid::COUNTRYNAME, self.country.as_str(), "country"),
            (Nid::STATEORPROVINCENAME, self.state.as_str(), "state/province"),
            (Nid::LOCALITYNAME, self.locality.as_str(), "locality"),
            (Nid::ORGANIZATIONNAME, self.organization.as_str(), "organization"),
            (
                Nid::ORGANIZATIONALUNITNAME,
                self.organizational_unit.as_str(),
                "organizational unit",
            ),
            (Nid::COMMONNAME, common_name, "CN"),
        ];
        for (nid, value, label) in entries {
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| anyhow!("Failed to set {} to {:?}: {}", label, value, e))?;
        }
        Ok(name_builder.build())
    }
}

/// Render an X.509 name as `key=value` pairs in reverse order.
pub fn render_rfc4514(name: &X509NameRef) -> Result<String> {
    let mut components = Vec::new();
    for entry in name.entries() {
        let key = entry
            .object()
            .nid()
            .short_name()
            .map_err(|e| anyhow!("Subject contains an attribute without a short name: {}", e))?;
        let value = entry
            .data()
            .to_string()
            .map_err(|e| anyhow!("Subject attribute {} is not valid text: {}", key, e))?;
        components.push((key.to_string(), value));
    }
    Ok(render_components(&components))
}

/// Join `(key, value)` components in reverse insertion order.
pub fn render_components(components: &[(String, String)]) -> String {
    components
        .iter()
        .rev()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> SubjectFields {
        SubjectFields {
            country: "DE".to_string(),
            state: "BW".to_string(),
            locality: "Karlsruhe".to_string(),
            organization: "Example Organization".to_string(),
            organizational_unit: "IT Services".to_string(),
        }
    }

    #[test]
    fn test_reverse_order_rendering() {
        let mut builder = X509Name::builder().unwrap();
        builder.append_entry_by_nid(Nid::COUNTRYNAME, "US").unwrap();
        builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Org").unwrap();
        builder.append_entry_by_nid(Nid::COMMONNAME, "host.example.com").unwrap();
        let name = builder.build();
        assert_eq!(render_rfc4514(&name).unwrap(), "CN=host.example.com,O=Org,C=US");
    }

    #[test]
    fn test_full_subject_renders_cn_first() {
        let name = fields().to_x509_name("UNITY").unwrap();
        assert_eq!(
            render_rfc4514(&name).unwrap(),
            "CN=UNITY,OU=IT Services,O=Example Organization,L=Karlsruhe,ST=BW,C=DE"
        );
    }

    #[test]
    fn test_non_ascii_values_render_as_text() {
        let mut zurich = fields();
        zurich.country = "CH".to_string();
        zurich.state = "ZH".to_string();
        zurich.locality = "Z\u{fc}rich".to_string();
        zurich.organization = "\u{c9}cole Num\u{e9}rique".to_string();
        let name = zurich.to_x509_name("GATEWAY").unwrap();
        assert_eq!(
            render_rfc4514(&name).unwrap(),
            "CN=GATEWAY,OU=IT Services,O=\u{c9}cole Num\u{e9}rique,L=Z\u{fc}rich,ST=ZH,C=CH"
        );
    }

    #[test]
    fn test_special_characters_are_not_escaped() {
        let components = vec![
            ("O".to_string(), "Acme, Inc.".to_string()),
            ("CN".to_string(), "a+b".to_string()),
        ];
        assert_eq!(render_components(&components), "CN=a+b,O=Acme, Inc.");
    }

    #[test]
    fn test_invalid_country_is_rejected() {
        let mut bad = fields();
        bad.country = "Germany".to_string();
        assert!(bad.to_x509_name("GATEWAY").is_err());
    }
}
