//! Nginx Development Kit.

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::git_module::prepare_git_module;
use super::{downcast_eq, record_fields, Installer};
use crate::context::Context;
use crate::error::Result;

pub const NDK_URL: &str = "https://github.com/vision5/ngx_devel_kit.git";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NginxDevKitInstaller {
    pub enabled: bool,
    pub dynamic: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[async_trait]
impl Installer for NginxDevKitInstaller {
    fn tag(&self) -> &'static str {
        "NginxDevKitInstaller"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn set_dynamic(&mut self, dynamic: bool) -> bool {
        self.dynamic = dynamic;
        true
    }

    fn ngx_module_names(&self) -> Vec<String> {
        vec!["ndk_http_module".to_string()]
    }

    fn matches_name(&self, name: &str) -> bool {
        let wanted = name.trim().to_ascii_lowercase();
        wanted == "nginxdevkitinstaller" || wanted == "nginxdevkit" || wanted == "ngx-dev-kit"
    }

    fn fields(&self) -> Result<serde_yaml::Mapping> {
        record_fields(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_installer(&self, other: &dyn Installer) -> bool {
        downcast_eq(self, other)
    }

    async fn prepare(&self, ctx: &Context) -> Result<()> {
        prepare_git_module(ctx, NDK_URL, "ngx-dev-kit", &[], self.dynamic).await
    }
}
