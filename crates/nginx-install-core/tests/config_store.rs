//! Config files on disk and installers registered from outside the crate.

use std::any::Any;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nginx_install_core::config::{ConfigStore, YamlConfigStore};
use nginx_install_core::context::Context;
use nginx_install_core::installer::{downcast_eq, record_fields, GenericGitInstaller};
use nginx_install_core::registry::construct;
use nginx_install_core::{Config, Flavor, InstallError, Installer, Registry};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct LuaInstaller {
    enabled: bool,
    jit: bool,
}

#[async_trait]
impl Installer for LuaInstaller {
    fn tag(&self) -> &'static str {
        "LuaInstaller"
    }

    fn namespace(&self) -> &str {
        "acme.modules"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn fields(&self) -> nginx_install_core::Result<serde_yaml::Mapping> {
        record_fields(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_installer(&self, other: &dyn Installer) -> bool {
        downcast_eq(self, other)
    }

    async fn prepare(&self, _ctx: &Context) -> nginx_install_core::Result<()> {
        Ok(())
    }
}

fn registry_with_plugin() -> Registry {
    let mut registry = Registry::builtin();
    registry.register("acme.modules", "LuaInstaller", construct::<LuaInstaller>);
    registry
}

#[tokio::test]
async fn test_store_roundtrip_with_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let store = YamlConfigStore::new(dir.path().join("nested").join("config.yaml"));
    assert!(!store.exists().await);

    let mut config = Config::default();
    config.core.flavor = Flavor::Openresty;
    config.core.nginx_version = "mainline".to_string();
    config.installers.push(Box::new(LuaInstaller {
        enabled: true,
        jit: true,
    }));
    config.installers.push(Box::new(GenericGitInstaller::new(
        "https://github.com/vozlt/nginx-module-vts.git",
    )));
    store.save(&config).await.unwrap();
    assert!(store.exists().await);

    let text = std::fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("modulename: acme.modules"));

    let loaded = store.load(&registry_with_plugin()).await.unwrap();
    assert_eq!(loaded.core, config.core);
    assert_eq!(loaded.installers.len(), config.installers.len());
    for (a, b) in loaded.installers.iter().zip(config.installers.iter()) {
        assert!(**a == **b, "{a:?} != {b:?}");
    }
}

#[tokio::test]
async fn test_unregistered_plugin_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "installers:\n- classname: LuaInstaller\n  modulename: acme.modules\n  enabled: true\n",
    )
    .unwrap();

    let err = YamlConfigStore::new(&path)
        .load(&Registry::builtin())
        .await
        .unwrap_err();
    match err {
        InstallError::UnknownInstallerType { namespace, tag } => {
            assert_eq!(namespace, "acme.modules");
            assert_eq!(tag, "LuaInstaller");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "core:\n  flavor: [not, a, flavor]\n").unwrap();

    let err = YamlConfigStore::new(&path)
        .load(&Registry::builtin())
        .await
        .unwrap_err();
    match err {
        InstallError::ConfigValidation(reason) => {
            assert!(reason.contains("config.yaml"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_enable_named_from_command_line() {
    let mut config = Config::default();
    config.enable_named(&["brotli".to_string(), "FancyIndex".to_string()], true);
    let enabled: Vec<&str> = config.enabled_installers().map(|i| i.tag()).collect();
    assert_eq!(enabled, vec!["FancyIndexInstaller", "BrotliInstaller"]);
    assert!(config.enabled_installers().all(|i| i.is_dynamic()));

    let mut all = Config::default();
    all.enable_named(&["all".to_string()], false);
    // The generic git installer stays off without a URL.
    assert_eq!(all.enabled_installers().count(), all.installers.len() - 1);
}
