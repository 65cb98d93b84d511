//! Daemon Certs - command line entry point
//!
//! Settings are passed as `KEY=VALUE` arguments, optionally on top of a TOML
//! file given with `--config`. Without arguments, or while `FQDN` still has
//! its placeholder value, the tool prints its usage and every recognised key
//! and exits without touching the filesystem.

use anyhow::{Context, Result};
use clap::Parser;
use daemon_certs::provisioner::Provisioner;
use daemon_certs::settings::ConfigStore;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "daemon-certs", version, about = "Private PKI bootstrap for service daemons")]
struct Cli {
    /// Settings as KEY=VALUE pairs, e.g. FQDN=myhost.example.org
    settings: Vec<String>,

    /// TOML file with settings; command-line pairs override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print every recognised key with its resolved value and exit
    #[arg(long)]
    list_keys: bool,
}

const INFO_TEXT: &str = r#"
   ---- Daemon Certificate Generator ----

   Usage:
   daemon-certs [--config FILE] KEY=VALUE [KEY=VALUE ...]

   A typical command to generate certificates for all server daemons:

   daemon-certs FQDN=myhost.example.org \
                cert.email=admin@example.org \
                "cert.OrganizationalUnit=IT Services" \
                "cert.Organization=Example Organization" \
                cert.Country=DE \
                cert.Locality=Karlsruhe \
                cert.State=BW \
                GCID=MY-SITE

   Country must be a two letter code. Individual daemon host names can be set
   with Domains.<SERVER>=FQDN; they default to FQDN.

   Besides the certificates, the run writes into the support directory:
     rfc4514_dns.txt     the generated server DNs, one per line
     xuudb_commands.sh   the commands registering those DNs with XUUDB

   Only one run may operate on an installation at a time. Concurrent runs
   against the same directories are not supported.

   Recognised keys and their current values:
"#;

fn print_info(settings: &ConfigStore) {
    println!("{}", INFO_TEXT);
    for (key, value) in settings.iter() {
        println!("   {} = {}", key, value);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daemon_certs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut builder = ConfigStore::builder();
    if let Some(path) = &cli.config {
        builder = builder.file(path)?;
    }
    let settings = builder
        .eq_args(&cli.settings)
        .context("Invalid settings on the command line")?
        .build();

    let nothing_given = cli.settings.is_empty() && cli.config.is_none();
    if nothing_given || cli.list_keys || settings.is_placeholder() {
        print_info(&settings);
        return Ok(());
    }

    let report = Provisioner::new(settings)?.run()?;
    if report.ca_created {
        println!("Generated new CA, DN: <{}>", report.ca_dn);
    } else {
        println!("Using existing CA, DN: <{}>", report.ca_dn);
    }
    for issued in &report.issued {
        println!("Generated key for server {} DN: <{}>", issued.role, issued.dn);
    }
    Ok(())
}
