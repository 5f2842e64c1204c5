//! Cloudflare's zlib fork, linked statically.

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{downcast_eq, record_fields, Installer};
use crate::context::Context;
use crate::error::Result;
use crate::exec::CommandSpec;

pub const ZLIB_URL: &str = "https://github.com/cloudflare/zlib.git";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZlibInstaller {
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[async_trait]
impl Installer for ZlibInstaller {
    fn tag(&self) -> &'static str {
        "ZlibInstaller"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn matches_name(&self, name: &str) -> bool {
        let wanted = name.trim().to_ascii_lowercase();
        ["zlibinstaller", "zlib", "zlibcf", "zlibcfinstaller"].contains(&wanted.as_str())
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
        let path = ctx.build_dir().join("cloudflare-zlib");
        ctx.git_clone(ZLIB_URL, &path, false).await?;

        if tokio::fs::try_exists(path.join("configure.log"))
            .await
            .unwrap_or(false)
        {
            debug!(path = %path.display(), "zlib already configured");
        } else {
            ctx.run_checked(CommandSpec::new("./configure").cwd(&path))
                .await?;
        }

        ctx.core()
            .push_configure_opt(format!("--with-zlib={}", path.display()))
            .await;
        Ok(())
    }
}
