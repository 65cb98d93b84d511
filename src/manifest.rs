//! Which files a run touches and what it changes in them.
//!
//! The manifest is static data resolved once from the settings. Targets are
//! kept in `Vec`s so they are applied in the same order on every run.

use crate::layout::InstallLayout;
use crate::plain_patcher::PlainChange;
use crate::server_role::ServerRole;
use crate::settings::ConfigStore;
use crate::xml_patcher::XmlChangeSet;
use anyhow::Result;
use std::path::PathBuf;

const UNITY_SAML_AUTHENTICATOR: &str = "eu.unicore.services.rest.security.UnitySAMLAuthenticator";

#[derive(Debug, Clone)]
pub struct XmlTarget {
    pub path: PathBuf,
    pub changes: XmlChangeSet,
}

#[derive(Debug, Clone)]
pub struct PlainTarget {
    pub path: PathBuf,
    pub changes: Vec<PlainChange>,
}

/// A VO configuration document to (re)write for one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoTarget {
    pub component: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub xml: Vec<XmlTarget>,
    pub plain: Vec<PlainTarget>,
    pub vo: Vec<VoTarget>,
}

impl Manifest {
    pub fn from_settings(settings: &ConfigStore, layout: &InstallLayout) -> Result<Self> {
        let domain = |role: ServerRole| settings.get(&role.domain_key());
        let pass = |role: ServerRole| settings.get(&role.passphrase_key());

        let gcid = settings.get("GCID")?;
        let wf_gcid = settings.get("WF-GCID")?;
        let gateway = domain(ServerRole::Gateway)?;
        let unity = domain(ServerRole::Unity)?;
        let xuudb_host = format!("https://{}", domain(ServerRole::Xuudb)?);
        let xuudb_address = format!("https://{}:34463", domain(ServerRole::Xuudb)?);
        let registry_url = format!(
            "https://{}:8080/REGISTRY/services/Registry?res=default_registry",
            gateway
        );
        let unity_address = format!(
            "https://{}:2443/unicore-soapidp/saml2unicoreidp-soap/AuthenticationService",
            unity
        );

        let conf = |role: ServerRole, file: &str| layout.role_conf_file(role, file);

        let xml = vec![
            XmlTarget {
                path: conf(ServerRole::Unicorex, "xnjs_legacy.xml"),
                changes: XmlChangeSet::new()
                    .attribute("//eng:Property[@name='CLASSICTSI.ssl.disable']", "value", "false")
                    .attribute(
                        "//eng:Property[@name='CLASSICTSI.machine']",
                        "value",
                        domain(ServerRole::Tsi)?,
                    ),
            },
            wsrflite(settings, layout, ServerRole::Unicorex, gcid)?,
            wsrflite(settings, layout, ServerRole::Workflow, wf_gcid)?,
            wsrflite(settings, layout, ServerRole::Servorch, "SERVORCH")?,
            wsrflite(settings, layout, ServerRole::Registry, "REGISTRY")?,
        ];

        let unity_auth = |with_order: bool| {
            let mut changes = vec![
                PlainChange::assign(
                    "container.security.rest.authentication.UNITY.class",
                    UNITY_SAML_AUTHENTICATOR,
                ),
                PlainChange::assign(
                    "container.security.rest.authentication.UNITY.address",
                    unity_address.as_str(),
                ),
                PlainChange::assign("container.security.rest.authentication.UNITY.validate", "true"),
            ];
            if with_order {
                changes.push(PlainChange::assign(
                    "container.security.rest.authentication.UNITY.order",
                    "UNITY",
                ));
            }
            changes
        };
        let xuudb_attributes = || {
            vec![
                PlainChange::assign(
                    "container.security.attributes.XUUDB.xuudbHost",
                    xuudb_host.as_str(),
                ),
                PlainChange::assign("container.security.attributes.XUUDB.xuudbGCID", gcid),
            ]
        };
        let xuudb_conf = vec![
            PlainChange::assign("xuudb.address", xuudb_address.as_str()),
            PlainChange::assign("xuudb.credential.password", pass(ServerRole::Xuudb)?),
        ];

        let mut unicorex_uas = vec![
            PlainChange::assign(
                "coreServices.targetsystemfactory.xnjs.configfile",
                "conf/xnjs_legacy.xml",
            ),
            PlainChange::assign("container.sitename", gcid),
            PlainChange::assign("container.externalregistry.use", "true"),
            PlainChange::assign("container.externalregistry.url", registry_url.as_str()),
        ];
        unicorex_uas.extend(unity_auth(false));
        unicorex_uas.extend(xuudb_attributes());

        let mut workflow_uas = vec![
            PlainChange::assign("container.sitename", wf_gcid),
            PlainChange::assign("container.externalregistry.url", registry_url.as_str()),
        ];
        workflow_uas.extend(xuudb_attributes());
        workflow_uas.extend(unity_auth(true));

        let mut registry_uas = xuudb_attributes();
        registry_uas.extend(unity_auth(true));

        let mut servorch_uas = vec![PlainChange::assign(
            "container.externalregistry.url",
            registry_url.as_str(),
        )];
        servorch_uas.extend(xuudb_attributes());

        let plain = vec![
            PlainTarget {
                path: conf(ServerRole::Unicorex, "uas.config"),
                changes: unicorex_uas,
            },
            PlainTarget {
                path: conf(ServerRole::Gateway, "connections.properties"),
                changes: vec![
                    PlainChange::assign(
                        "REGISTRY",
                        format!("https://{}:7778", domain(ServerRole::Registry)?),
                    ),
                    PlainChange::assign(
                        "SERVORCH",
                        format!("https://{}:7701", domain(ServerRole::Servorch)?),
                    ),
                    PlainChange::assign(gcid, format!("https://{}:7777", domain(ServerRole::Unicorex)?)),
                ],
            },
            PlainTarget {
                path: conf(ServerRole::Gateway, "gateway.properties"),
                changes: vec![
                    PlainChange::assign("gateway.hostname", format!("https://{}:8080", gateway)),
                    PlainChange::assign("gateway.httpServer.requireClientAuthn", "false"),
                ],
            },
            PlainTarget {
                path: conf(ServerRole::Gateway, "security.properties"),
                changes: vec![PlainChange::assign(
                    "gateway.credential.password",
                    pass(ServerRole::Gateway)?,
                )],
            },
            PlainTarget {
                path: conf(ServerRole::Tsi, "tsi.properties"),
                changes: vec![
                    PlainChange::assign("tsi.my_addr", domain(ServerRole::Tsi)?),
                    PlainChange::assign("tsi.njs_machine", domain(ServerRole::Unicorex)?),
                    PlainChange::uncomment("tsi.keystore"),
                    PlainChange::assign("tsi.keypass", pass(ServerRole::Tsi)?),
                    PlainChange::uncomment("tsi.certificate"),
                    PlainChange::uncomment("tsi.truststore"),
                ],
            },
            PlainTarget {
                path: conf(ServerRole::Xuudb, "xuudb_client.conf"),
                changes: xuudb_conf.clone(),
            },
            PlainTarget {
                path: conf(ServerRole::Xuudb, "xuudb_server.conf"),
                changes: xuudb_conf,
            },
            PlainTarget {
                path: conf(ServerRole::Unity, "pki.properties"),
                changes: vec![
                    PlainChange::assign("unity.pki.credentials.MAIN.path", "{CONF}/pki/unity.p12"),
                    PlainChange::comment("unity.pki.credentials.MAIN.keyAlias"),
                    PlainChange::assign("unity.pki.credentials.MAIN.password", pass(ServerRole::Unity)?),
                    PlainChange::assign("unity.pki.truststores.MAIN.type", "directory"),
                    PlainChange::assign(
                        "unity.pki.truststores.MAIN.directoryLocations.1",
                        "{CONF}/pki/trusted-ca/*.pem",
                    ),
                    PlainChange::assign(
                        "unity.pki.truststores.MAIN.crlLocations.1",
                        "{CONF}/pki/trusted-ca/*.crl",
                    ),
                ],
            },
            PlainTarget {
                path: conf(ServerRole::Unity, "unityServer.conf"),
                changes: vec![
                    PlainChange::assign("unityServer.core.httpServer.host", unity),
                    PlainChange::assign("unityServer.core.httpServer.advertisedHost", unity),
                    PlainChange::comment("$include.oauthAS"),
                    PlainChange::comment("$include.demoContents"),
                    PlainChange::uncomment("$include.unicoreWithPam"),
                ],
            },
            PlainTarget {
                path: conf(ServerRole::Workflow, "uas.config"),
                changes: workflow_uas,
            },
            PlainTarget {
                path: conf(ServerRole::Registry, "uas.config"),
                changes: registry_uas,
            },
            PlainTarget {
                path: conf(ServerRole::Servorch, "uas.config"),
                changes: servorch_uas,
            },
        ];

        let vo = [
            (gcid, ServerRole::Unicorex),
            ("SERVORCH", ServerRole::Servorch),
            (wf_gcid, ServerRole::Workflow),
            ("REGISTRY", ServerRole::Registry),
        ]
        .into_iter()
        .map(|(component, role)| VoTarget {
            component: component.to_string(),
            path: conf(role, "vo.config"),
        })
        .collect();

        Ok(Self { xml, plain, vo })
    }
}

/// Container settings shared by every service hosted behind the gateway.
fn wsrflite(
    settings: &ConfigStore,
    layout: &InstallLayout,
    role: ServerRole,
    site: &str,
) -> Result<XmlTarget> {
    let property = |name: &str| format!("//property[@name='{}']", name);
    let gateway = settings.get(&ServerRole::Gateway.domain_key())?;
    Ok(XmlTarget {
        path: layout.role_conf_file(role, "wsrflite.xml"),
        changes: XmlChangeSet::new()
            .attribute(
                property("container.baseurl"),
                "value",
                format!("https://{}:8080/{}/services", gateway, site),
            )
            .attribute(
                property("container.host"),
                "value",
                settings.get(&role.domain_key())?,
            )
            .attribute(
                property("container.security.credential.password"),
                "value",
                settings.get(&role.passphrase_key())?,
            )
            .attribute(
                property("container.client.serverHostnameChecking"),
                "value",
                "WARN",
            ),
    })
}
