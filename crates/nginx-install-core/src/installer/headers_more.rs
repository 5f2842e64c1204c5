//! headers-more: set and clear arbitrary request/response headers.

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{downcast_eq, module_opt, record_fields, Installer};
use crate::context::Context;
use crate::error::Result;

pub const HEADERS_MORE_URL: &str = "https://github.com/openresty/headers-more-nginx-module.git";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersMoreInstaller {
    pub enabled: bool,
    pub dynamic: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[async_trait]
impl Installer for HeadersMoreInstaller {
    fn tag(&self) -> &'static str {
        "HeadersMoreInstaller"
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
        vec!["ngx_http_headers_more_filter_module".to_string()]
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
        let path = ctx.build_dir().join("headers-more-nginx-module");
        debug!(path = %path.display(), "cloning headers-more");
        ctx.git_clone(HEADERS_MORE_URL, &path, false).await?;
        ctx.core()
            .push_configure_opt(module_opt(self.dynamic, &path))
            .await;
        Ok(())
    }
}
