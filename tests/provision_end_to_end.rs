use daemon_certs::layout::{DN_LIST_FILE, SERIAL_FILE, XUUDB_COMMANDS_FILE};
use daemon_certs::provisioner::Provisioner;
use daemon_certs::server_role::ServerRole;
use daemon_certs::settings::ConfigStore;
use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;
use std::fs;
use std::path::Path;

fn settings(root: &Path) -> ConfigStore {
    let dir = |name: &str| root.join(name).display().to_string();
    ConfigStore::builder()
        .eq_args([
            "FQDN=site.example.org".to_string(),
            "GCID=MY-SITE".to_string(),
            "Domains.UNITY=idp.example.org".to_string(),
            "cert.years=1".to_string(),
            format!("directory.ca={}", dir("ca")),
            format!("directory.certs={}", dir("certs")),
            format!("directory.unicore={}", dir("unicore")),
            format!("directory.support={}", dir("support")),
        ])
        .unwrap()
        .build()
}

#[test]
fn test_fresh_installation_then_rerun() {
    let root = tempfile::tempdir().unwrap();
    let root = root.path();

    let first = Provisioner::new(settings(root)).unwrap().run().unwrap();
    assert!(first.ca_created);

    assert!(root.join("ca").join("cacert.pem").is_file());
    assert!(root.join("ca").join("private").join("cakey.pem").is_file());
    for role in ServerRole::ALL {
        let bundle = root.join("certs").join(format!("{}.p12", role.bundle_stem()));
        assert!(bundle.is_file(), "missing {}", bundle.display());
    }
    assert_eq!(
        fs::read_to_string(root.join("ca").join(SERIAL_FILE)).unwrap(),
        "9\n"
    );

    let dns = fs::read_to_string(root.join("support").join(DN_LIST_FILE)).unwrap();
    let dns: Vec<&str> = dns.lines().collect();
    assert_eq!(dns.len(), 8);
    assert_eq!(
        dns[0],
        "CN=GATEWAY,OU=IT Services,O=Example Organization,L=Karlsruhe,ST=BW,C=DE"
    );

    let commands = fs::read_to_string(root.join("support").join(XUUDB_COMMANDS_FILE)).unwrap();
    let commands: Vec<&str> = commands.lines().collect();
    assert_eq!(commands.len(), 8);
    assert_eq!(
        commands[7],
        format!("bin/admin.sh adddn MY-SITE \"{}\" nobody server", dns[7])
    );

    let gateway_properties =
        fs::read_to_string(root.join("unicore/gateway/conf/gateway.properties")).unwrap();
    assert_eq!(
        gateway_properties,
        "gateway.hostname=https://site.example.org:8080\n\
         gateway.httpServer.requireClientAuthn=false\n"
    );
    let instructions =
        fs::read_to_string(root.join("unicore/unicorex/conf/xnjs_legacy.xml.instructions.txt"))
            .unwrap();
    assert_eq!(instructions.lines().count(), 2);
    let vo = fs::read_to_string(root.join("unicore/registry/conf/vo.config")).unwrap();
    assert!(vo.contains("https://idp.example.org:2443/"));

    let ca_pem = fs::read(root.join("ca").join("cacert.pem")).unwrap();
    let unicorex_before = fs::read(root.join("certs").join("unicorex.p12")).unwrap();

    let second = Provisioner::new(settings(root)).unwrap().run().unwrap();
    assert!(!second.ca_created);
    assert_eq!(second.ca_dn, first.ca_dn);
    assert_eq!(fs::read(root.join("ca").join("cacert.pem")).unwrap(), ca_pem);
    assert_eq!(
        fs::read_to_string(root.join("ca").join(SERIAL_FILE)).unwrap(),
        "11\n"
    );
    assert_eq!(second.issued[0].serial, 10);
    assert_eq!(
        fs::read_to_string(root.join("unicore/gateway/conf/gateway.properties")).unwrap(),
        gateway_properties
    );

    // reissued with a new serial, still chained to the same CA
    let unicorex_after = fs::read(root.join("certs").join("unicorex.p12")).unwrap();
    assert_ne!(unicorex_after, unicorex_before);
    let parsed = Pkcs12::from_der(&unicorex_after)
        .unwrap()
        .parse2("the!njs")
        .unwrap();
    let ca = X509::from_pem(&ca_pem).unwrap();
    assert!(parsed
        .cert
        .unwrap()
        .verify(&ca.public_key().unwrap())
        .unwrap());
}

#[test]
fn test_existing_config_files_are_patched_in_place() {
    let root = tempfile::tempdir().unwrap();
    let root = root.path();
    let wsrflite = root.join("unicore/workflow/conf/wsrflite.xml");
    fs::create_dir_all(wsrflite.parent().unwrap()).unwrap();
    fs::write(
        &wsrflite,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<properties>
  <property name="container.baseurl" value="x"/>
  <property name="container.host" value="x"/>
  <property name="container.security.credential.password" value="x"/>
  <property name="container.client.serverHostnameChecking" value="x"/>
</properties>
"#,
    )
    .unwrap();
    let unity_conf = root.join("unicore/unity/conf/unityServer.conf");
    fs::create_dir_all(unity_conf.parent().unwrap()).unwrap();
    fs::write(
        &unity_conf,
        "$include.oauthAS=oauth.conf\n#$include.unicoreWithPam=pam.conf\nunityServer.core.httpServer.host=localhost\n",
    )
    .unwrap();

    Provisioner::new(settings(root)).unwrap().run().unwrap();

    let xml = fs::read_to_string(&wsrflite).unwrap();
    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(xml.contains("https://site.example.org:8080/WORKFLOW/services"));
    assert!(xml.contains("the!workflow"));
    assert!(!root
        .join("unicore/workflow/conf/wsrflite.xml.instructions.txt")
        .exists());

    assert_eq!(
        fs::read_to_string(&unity_conf).unwrap(),
        "#$include.oauthAS=oauth.conf\n\
         $include.unicoreWithPam=pam.conf\n\
         unityServer.core.httpServer.host=idp.example.org\n\
         unityServer.core.httpServer.advertisedHost=idp.example.org\n"
    );
}
