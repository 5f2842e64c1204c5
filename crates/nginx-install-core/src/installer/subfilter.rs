//! Substitutions filter (`subs_filter`).

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::git_module::prepare_git_module;
use super::{downcast_eq, record_fields, Installer};
use crate::context::Context;
use crate::error::Result;

pub const SUBFILTER_URL: &str =
    "https://github.com/yaoweibin/ngx_http_substitutions_filter_module";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubFilterInstaller {
    pub enabled: bool,
    pub dynamic: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[async_trait]
impl Installer for SubFilterInstaller {
    fn tag(&self) -> &'static str {
        "SubFilterInstaller"
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
        vec!["ngx_http_subs_filter_module".to_string()]
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
        prepare_git_module(ctx, SUBFILTER_URL, "substitution_filter", &[], self.dynamic).await
    }
}
