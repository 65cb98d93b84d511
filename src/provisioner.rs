//! Drives one provisioning run.
//!
//! A run moves through [`RunState`] in order: the CA is loaded or created,
//! every role gets a fresh certificate and its exported credentials, the
//! configuration manifest is applied, and finally the serial counter is
//! written back. The last step happens on every exit path, including errors.
//!
//! Everything the run needs from the settings is resolved before the first
//! file is touched, so a missing key aborts without side effects.
//!
//! Runs assume exclusive ownership of the installation tree. Nothing is
//! locked, and two concurrent runs against the same tree can hand out the same
//! serial twice.

use crate::certificate_authority::{
    write_file, CaParams, CertificateAuthority, IssuedCertificate, ServerIdentity,
};
use crate::credential_export::export_role_credentials;
use crate::distinguished_name::SubjectFields;
use crate::error::ProvisionError;
use crate::layout::{InstallLayout, DN_LIST_FILE, XUUDB_COMMANDS_FILE};
use crate::manifest::Manifest;
use crate::plain_patcher::{self, PlainAction};
use crate::serial::{SerialCounter, SerialGuard};
use crate::server_role::ServerRole;
use crate::settings::ConfigStore;
use crate::vo_config::VoConfig;
use crate::xml_patcher;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    CaReady,
    CertificatesIssued,
    ConfigPatched,
    Finalized,
}

/// One line of the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSummary {
    pub role: ServerRole,
    pub serial: u64,
    pub dn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub ca_created: bool,
    pub ca_dn: String,
    pub issued: Vec<IssuedSummary>,
}

/// Settings-derived inputs of a run, resolved up front.
struct RunPlan {
    ca: CaParams,
    subject: SubjectFields,
    identities: Vec<ServerIdentity>,
    manifest: Manifest,
    gcid: String,
    unity_fqdn: String,
    gateway_fqdn: String,
}

impl RunPlan {
    fn resolve(settings: &ConfigStore, layout: &InstallLayout) -> Result<Self> {
        let identities = ServerRole::ALL
            .into_iter()
            .map(|role| ServerIdentity::from_settings(role, settings))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ca: CaParams::from_settings(settings)?,
            subject: SubjectFields::from_settings(settings)?,
            identities,
            manifest: Manifest::from_settings(settings, layout)?,
            gcid: settings.get("GCID")?.to_string(),
            unity_fqdn: settings.get(&ServerRole::Unity.domain_key())?.to_string(),
            gateway_fqdn: settings.get(&ServerRole::Gateway.domain_key())?.to_string(),
        })
    }
}

pub struct Provisioner {
    settings: ConfigStore,
    layout: InstallLayout,
    state: RunState,
}

impl Provisioner {
    pub fn new(settings: ConfigStore) -> Result<Self> {
        let layout = InstallLayout::from_settings(&settings)?;
        Ok(Self {
            settings,
            layout,
            state: RunState::Uninitialized,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Run every step once. The serial counter is persisted whatever happens;
    /// if both the run and that flush fail, the error carries both.
    pub fn run(&mut self) -> Result<ProvisionReport> {
        let plan = RunPlan::resolve(&self.settings, &self.layout)
            .context("Failed to resolve settings")?;
        let counter = SerialCounter::load(&self.layout.ca_dir)?;
        info!(next_serial = counter.peek(), "starting provisioning run");

        let mut serial = SerialGuard::new(counter, self.layout.ca_dir.clone());
        let outcome = self.execute(&plan, &mut serial);
        let last_issued = serial.last_issued();
        let flushed = serial.finish();
        self.state = RunState::Finalized;

        match (outcome, flushed) {
            (Ok(report), Ok(())) => {
                info!(last_serial = last_issued, issued = report.issued.len(), "provisioning finished");
                Ok(report)
            }
            (Err(primary), Ok(())) => Err(primary),
            (Ok(_), Err(flush)) => Err(flush),
            (Err(primary), Err(flush)) => Err(ProvisionError::FinalizeFailed { primary, flush }.into()),
        }
    }

    fn execute(&mut self, plan: &RunPlan, serial: &mut SerialCounter) -> Result<ProvisionReport> {
        let bootstrap = CertificateAuthority::bootstrap_or_load(&self.layout, &plan.ca, serial)?;
        let ca = bootstrap.ca;
        let ca_dn = ca.dn()?;
        self.state = RunState::CaReady;

        let issued = self.issue_all(plan, &ca, serial)?;
        self.state = RunState::CertificatesIssued;

        self.apply_manifest(plan)?;
        self.state = RunState::ConfigPatched;

        Ok(ProvisionReport {
            ca_created: bootstrap.created,
            ca_dn,
            issued,
        })
    }

    /// Issue and export a certificate per role, recording each DN in the
    /// support files as it goes.
    fn issue_all(
        &self,
        plan: &RunPlan,
        ca: &CertificateAuthority,
        serial: &mut SerialCounter,
    ) -> Result<Vec<IssuedSummary>> {
        fs::create_dir_all(&self.layout.support_dir).with_context(|| {
            format!("Failed to create directory {}", self.layout.support_dir.display())
        })?;
        let mut commands = audit_writer(&self.layout, XUUDB_COMMANDS_FILE)?;
        let mut dn_list = audit_writer(&self.layout, DN_LIST_FILE)?;

        let mut summaries = Vec::with_capacity(plan.identities.len());
        for identity in &plan.identities {
            let issued = ca.issue_server_certificate(identity, &plan.subject, serial)?;
            export_role_credentials(&self.layout, &issued, ca.certificate(), &identity.passphrase)?;
            info!(role = %issued.role, serial = issued.serial, dn = %issued.dn, "issued server certificate");

            writeln!(
                commands,
                "bin/admin.sh adddn {} \"{}\" nobody server",
                plan.gcid, issued.dn
            )?;
            writeln!(dn_list, "{}", issued.dn)?;
            self.dn_hooks(&issued)?;

            summaries.push(IssuedSummary {
                role: issued.role,
                serial: issued.serial,
                dn: issued.dn,
            });
        }
        commands.flush()?;
        dn_list.flush()?;
        Ok(summaries)
    }

    /// Follow-up edits that need a freshly issued DN.
    fn dn_hooks(&self, issued: &IssuedCertificate) -> Result<()> {
        match issued.role {
            ServerRole::Xuudb => {
                let acl = self.layout.role_conf_file(ServerRole::Xuudb, "xuudb.acl");
                write_file(&acl, format!("{}\n", issued.dn).as_bytes())?;
                debug!(file = %acl.display(), "XUUDB ACL written");
            }
            ServerRole::Unicorex => {
                let tsi_properties = self.layout.role_conf_file(ServerRole::Tsi, "tsi.properties");
                plain_patcher::upsert(
                    &tsi_properties,
                    "tsi.allowed_dn.1",
                    &PlainAction::Assign(issued.dn.clone()),
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_manifest(&self, plan: &RunPlan) -> Result<()> {
        for target in &plan.manifest.xml {
            xml_patcher::apply_change_set(&target.path, &target.changes)?;
        }
        for target in &plan.manifest.plain {
            plain_patcher::apply_changes(&target.path, &target.changes)
                .with_context(|| format!("Failed to patch {}", target.path.display()))?;
            info!(file = %target.path.display(), changes = target.changes.len(), "patched");
        }
        for target in &plan.manifest.vo {
            VoConfig::new(
                &self.layout.unity_cert(),
                &target.component,
                &plan.unity_fqdn,
                &plan.gateway_fqdn,
            )?
            .write_to(&target.path)?;
        }
        Ok(())
    }
}

fn audit_writer(layout: &InstallLayout, name: &str) -> Result<BufWriter<File>> {
    let path = layout.support_file(name);
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SERIAL_FILE;
    use std::path::Path;

    fn settings(root: &Path) -> ConfigStore {
        let dir = |name: &str| format!("{}", root.join(name).display());
        ConfigStore::builder()
            .set("FQDN", "site.example.org")
            .unwrap()
            .set("GCID", "MY-SITE")
            .unwrap()
            .set("cert.years", "1")
            .unwrap()
            .set("directory.ca", &dir("ca"))
            .unwrap()
            .set("directory.certs", &dir("certs"))
            .unwrap()
            .set("directory.unicore", &dir("unicore"))
            .unwrap()
            .set("directory.support", &dir("support"))
            .unwrap()
            .build()
    }

    #[test]
    fn test_run_reaches_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let mut provisioner = Provisioner::new(settings(dir.path())).unwrap();
        assert_eq!(provisioner.state(), RunState::Uninitialized);

        let report = provisioner.run().unwrap();
        assert_eq!(provisioner.state(), RunState::Finalized);
        assert!(report.ca_created);
        assert_eq!(report.issued.len(), ServerRole::ALL.len());
        let serials: Vec<u64> = report.issued.iter().map(|s| s.serial).collect();
        assert_eq!(serials, (2..=9).collect::<Vec<u64>>());
    }

    #[test]
    fn test_dn_hooks_wire_xuudb_and_tsi() {
        let dir = tempfile::tempdir().unwrap();
        let mut provisioner = Provisioner::new(settings(dir.path())).unwrap();
        let report = provisioner.run().unwrap();
        let layout = provisioner.layout();

        let dn_of = |role: ServerRole| {
            report
                .issued
                .iter()
                .find(|s| s.role == role)
                .unwrap()
                .dn
                .clone()
        };
        let acl = fs::read_to_string(layout.conf_file("xuudb", "xuudb.acl")).unwrap();
        assert_eq!(acl, format!("{}\n", dn_of(ServerRole::Xuudb)));

        let tsi = fs::read_to_string(layout.conf_file("tsi_selected", "tsi.properties")).unwrap();
        assert!(tsi.starts_with(&format!("tsi.allowed_dn.1={}\n", dn_of(ServerRole::Unicorex))));
        assert!(tsi.contains("tsi.keypass=the!tsi\n"));
    }

    #[test]
    fn test_xml_mismatch_still_flushes_serial() {
        let dir = tempfile::tempdir().unwrap();
        let mut provisioner = Provisioner::new(settings(dir.path())).unwrap();
        let xnjs = provisioner.layout().conf_file("unicorex", "xnjs_legacy.xml");
        fs::create_dir_all(xnjs.parent().unwrap()).unwrap();
        fs::write(
            &xnjs,
            r#"<eng:EngineConfiguration xmlns:eng="http://example.org/engine"/>"#,
        )
        .unwrap();

        let err = provisioner.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::XPathNoMatch { .. })
        ));
        assert_eq!(provisioner.state(), RunState::Finalized);
        let serial = fs::read_to_string(dir.path().join("ca").join(SERIAL_FILE)).unwrap();
        assert_eq!(serial, "9\n");
    }

    #[test]
    fn test_failed_flush_keeps_primary_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut provisioner = Provisioner::new(settings(dir.path())).unwrap();
        // a regular file where the CA directory belongs
        fs::write(dir.path().join("ca"), "not a directory").unwrap();

        let err = provisioner.run().unwrap_err();
        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::FinalizeFailed { primary, flush }) => {
                assert!(format!("{:#}", primary).contains("private"));
                assert!(format!("{:#}", flush).contains("CA directory"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_serial_aborts_before_issuing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ca")).unwrap();
        fs::write(dir.path().join("ca").join(SERIAL_FILE), "zz\n").unwrap();
        let mut provisioner = Provisioner::new(settings(dir.path())).unwrap();

        let err = provisioner.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::MalformedSerial { .. })
        ));
        assert!(!dir.path().join("certs").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("ca").join(SERIAL_FILE)).unwrap(),
            "zz\n"
        );
    }
}
