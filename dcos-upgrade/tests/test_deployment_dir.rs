// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading and updating a deployment directory.

use camino_tempfile::Utf8TempDir;
use dcos_upgrade::cluster::record_orchestrator_version;
use dcos_upgrade::cluster::ClusterSpecError;
use dcos_upgrade::cluster::API_MODEL_FILE_NAME;
use dcos_upgrade::ClusterSpec;
use std::net::Ipv4Addr;

const API_MODEL: &str = r#"{
  "apiVersion": "vlabs",
  "location": "eastus",
  "properties": {
    "orchestratorProfile": {
      "orchestratorType": "DCOS",
      "orchestratorVersion": "1.11.2",
      "linuxBootstrapProfile": {
        "staticIP": "172.16.0.10"
      }
    },
    "masterProfile": {
      "count": 1,
      "dnsPrefix": "dcos-prod",
      "firstConsecutiveStaticIP": "172.16.255.5",
      "vmSize": "Standard_D2s_v3"
    },
    "agentPoolProfiles": [
      { "name": "private", "count": 3, "vmSize": "Standard_D2s_v3" }
    ],
    "linuxProfile": {
      "adminUsername": "azureuser",
      "ssh": { "publicKeys": [ { "keyData": "ssh-rsa AAAA" } ] }
    }
  }
}"#;

fn deployment_dir() -> Utf8TempDir {
    let dir = Utf8TempDir::new().unwrap();
    std::fs::write(dir.path().join(API_MODEL_FILE_NAME), API_MODEL).unwrap();
    dir
}

#[test]
fn loads_linux_only_cluster() {
    let dir = deployment_dir();
    let spec = ClusterSpec::from_deployment_dir(dir.path()).unwrap();
    assert_eq!(spec.orchestrator_version, "1.11.2");
    assert!(!spec.oauth_enabled);
    assert_eq!(spec.master_count, 1);
    assert_eq!(spec.master_fqdn(), "dcos-prod.eastus.cloudapp.azure.com");
    assert_eq!(spec.master_ips(), ["172.16.255.5"]);
    assert_eq!(spec.linux_bootstrap_ip, Ipv4Addr::new(172, 16, 0, 10));
    assert!(!spec.has_windows_pools());
    assert!(spec.windows_admin.is_none());
}

#[test]
fn missing_api_model_names_the_path() {
    let dir = Utf8TempDir::new().unwrap();
    let err = ClusterSpec::from_deployment_dir(dir.path()).unwrap_err();
    match err {
        ClusterSpecError::Io { path, .. } => {
            assert_eq!(path, dir.path().join(API_MODEL_FILE_NAME));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn records_new_version_and_keeps_other_fields() {
    let dir = deployment_dir();
    record_orchestrator_version(dir.path(), "1.12.0").unwrap();

    let spec = ClusterSpec::from_deployment_dir(dir.path()).unwrap();
    assert_eq!(spec.orchestrator_version, "1.12.0");

    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(API_MODEL_FILE_NAME))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        json["properties"]["linuxProfile"]["ssh"]["publicKeys"][0]["keyData"],
        "ssh-rsa AAAA"
    );
    assert_eq!(
        json["properties"]["masterProfile"]["vmSize"],
        "Standard_D2s_v3"
    );
    assert!(!dir.path().join(format!("{API_MODEL_FILE_NAME}.tmp")).exists());
}
