//! Daemon Certs - Private PKI bootstrap for a fixed set of service daemons
//!
//! Creates (once) an installation CA, issues a server certificate to each
//! daemon of a multi-service installation, exports the credentials in the
//! shape each daemon expects, and rewrites the daemons' configuration files to
//! reference them. Every step is safe to re-run against a partially
//! provisioned installation.
//!
//! # Overview
//!
//! ```text
//! Installation CA (self-signed, created on first run, reused afterwards)
//!   ├── GATEWAY, XUUDB, UNICOREX, REGISTRY,
//!   └── UNITY, WORKFLOW, SERVORCH, TSI   (CA-signed, reissued every run)
//! ```
//!
//! A run then patches plain `key=value` files and XML files under the
//! installation root and writes a `vo.config` per service. XML files that do
//! not exist yet get an `<file>.instructions.txt` next to where they belong.
//!
//! # Quick Start
//!
//! ```bash
//! daemon-certs FQDN=myhost.example.org GCID=MY-SITE cert.email=admin@example.org
//! ```
//!
//! ## As a Library
//!
//! ```no_run
//! use daemon_certs::provisioner::Provisioner;
//! use daemon_certs::settings::ConfigStore;
//!
//! let settings = ConfigStore::builder()
//!     .eq_args(["FQDN=myhost.example.org", "GCID=MY-SITE"])?
//!     .build();
//! let report = Provisioner::new(settings)?.run()?;
//! for issued in &report.issued {
//!     println!("{} {}", issued.role, issued.dn);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # Module Overview
//!
//! - [`settings`]: configuration store (defaults, TOML file, `key=value` args)
//! - [`layout`]: where everything lives on disk
//! - [`serial`]: persistent certificate serial counter
//! - [`generate_ca`], [`generate_server_cert`]: certificate builders
//! - [`certificate_authority`]: bootstrap-or-load and issuance
//! - [`credential_export`]: PKCS#12 bundles and per-daemon PEM layouts
//! - [`plain_patcher`], [`xml_patcher`]: idempotent configuration edits
//! - [`manifest`]: the files and keys a run touches
//! - [`provisioner`]: the run itself
//!
//! # Error Handling
//!
//! Public APIs return `anyhow::Result<T>`. Failures that callers need to tell
//! apart are [`error::ProvisionError`] values inside the `anyhow::Error`.
//!
//! # Concurrency
//!
//! A run is single-threaded and expects to own the installation tree. Running
//! two instances against the same directories at once is not supported.

pub mod certificate_authority;
pub mod credential_export;
pub mod distinguished_name;
pub mod error;
pub mod generate_ca;
pub mod generate_server_cert;
pub mod layout;
pub mod manifest;
pub mod plain_patcher;
pub mod provisioner;
pub mod serial;
pub mod server_role;
pub mod settings;
pub mod vo_config;
pub mod xml_patcher;
