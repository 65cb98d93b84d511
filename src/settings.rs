//! Configuration store
//!
//! Settings are resolved once per run into an immutable map of dotted keys
//! (`Domains.UNITY`, `cert.Country`, ...). Sources are applied in order, later
//! sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. an optional TOML file, whose nested tables flatten to dotted keys
//! 3. `key=value` pairs from the command line
//!
//! Every `Domains.<ROLE>` that was not given explicitly falls back to `FQDN`.
//!
//! ```toml
//! FQDN = "unicore.example.org"
//! GCID = "EXAMPLE-SITE"
//!
//! [cert]
//! Country = "DE"
//! years = 5
//!
//! [Domains]
//! UNITY = "idp.example.org"
//! ```

use crate::error::ProvisionError;
use crate::server_role::ServerRole;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Host name the defaults ship with. A run against it is refused.
pub const PLACEHOLDER_FQDN: &str = "unicore.sample-fqdn.com";

const STATIC_DEFAULTS: &[(&str, &str)] = &[
    ("FQDN", PLACEHOLDER_FQDN),
    ("GCID", "DEMO-SITE"),
    ("WF-GCID", "WORKFLOW"),
    ("cert.Country", "DE"),
    ("cert.State", "BW"),
    ("cert.Locality", "Karlsruhe"),
    ("cert.Organization", "Example Organization"),
    ("cert.OrganizationalUnit", "IT Services"),
    ("cert.email", "admin@example.com"),
    ("cert.years", "3"),
    ("directory.ca", "ca"),
    ("directory.certs", "certs"),
    ("directory.unicore", "unicore"),
    ("directory.support", "support"),
];

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(flatten)]
    entries: BTreeMap<String, toml::Value>,
}

/// Resolved, read-only settings for one run.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    values: BTreeMap<String, String>,
}

impl ConfigStore {
    pub fn builder() -> ConfigStoreBuilder {
        ConfigStoreBuilder::new()
    }

    /// Look up a key, failing with [`ProvisionError::MissingKey`] when absent.
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ProvisionError::MissingKey(key.to_string()).into())
    }

    pub fn get_u32(&self, key: &str) -> Result<u32> {
        let raw = self.get(key)?;
        raw.trim().parse::<u32>().map_err(|e| {
            ProvisionError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// True when the installation host name was never configured.
    pub fn is_placeholder(&self) -> bool {
        self.values.get("FQDN").map(String::as_str) == Some(PLACEHOLDER_FQDN)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug)]
pub struct ConfigStoreBuilder {
    values: BTreeMap<String, String>,
}

impl ConfigStoreBuilder {
    fn new() -> Self {
        let mut values: BTreeMap<String, String> = STATIC_DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for role in ServerRole::ALL {
            values.insert(role.passphrase_key(), role.default_passphrase().to_string());
        }
        Self { values }
    }

    /// Set a single key. Keys outside the recognised set are rejected.
    pub fn set(mut self, key: &str, value: &str) -> Result<Self> {
        if !is_recognised(key) {
            return Err(ProvisionError::UnknownKey(key.to_string()).into());
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(self)
    }

    /// Apply a `key=value` argument. Only the first `=` separates key and value.
    pub fn eq_arg(self, arg: &str) -> Result<Self> {
        let (key, value) = arg.split_once('=').ok_or_else(|| ProvisionError::InvalidValue {
            key: arg.to_string(),
            value: String::new(),
            reason: "expected KEY=VALUE".to_string(),
        })?;
        self.set(key.trim(), value.trim())
    }

    pub fn eq_args<I, S>(mut self, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self = self.eq_arg(arg.as_ref())?;
        }
        Ok(self)
    }

    /// Merge a TOML settings file.
    pub fn file(self, path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        self.toml_str(&text)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn toml_str(mut self, text: &str) -> Result<Self> {
        let parsed: SettingsFile = toml::from_str(text)?;
        let mut flat = BTreeMap::new();
        for (key, value) in &parsed.entries {
            flatten(key, value, &mut flat)?;
        }
        for (key, value) in flat {
            self = self.set(&key, &value)?;
        }
        Ok(self)
    }

    pub fn build(mut self) -> ConfigStore {
        let fqdn = self.values.get("FQDN").cloned().unwrap_or_default();
        for role in ServerRole::ALL {
            self.values.entry(role.domain_key()).or_insert_with(|| fqdn.clone());
        }
        ConfigStore {
            values: self.values,
        }
    }
}

fn is_recognised(key: &str) -> bool {
    STATIC_DEFAULTS.iter().any(|(k, _)| *k == key)
        || ServerRole::ALL
            .iter()
            .any(|role| role.domain_key() == key || role.passphrase_key() == key)
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) -> Result<()> {
    let scalar = match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                flatten(&format!("{}.{}", prefix, key), nested, out)?;
            }
            return Ok(());
        }
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => {
            return Err(ProvisionError::InvalidValue {
                key: prefix.to_string(),
                value: other.to_string(),
                reason: "only strings, numbers and booleans are supported".to_string(),
            }
            .into())
        }
    };
    out.insert(prefix.to_string(), scalar);
    Ok(())
}
