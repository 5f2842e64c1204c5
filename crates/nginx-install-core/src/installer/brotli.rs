//! Brotli compression filters.

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{downcast_eq, module_opt, record_fields, Installer};
use crate::context::Context;
use crate::error::Result;
use crate::exec::CommandSpec;

pub const BROTLI_URL: &str = "https://github.com/google/ngx_brotli.git";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrotliInstaller {
    pub enabled: bool,
    pub dynamic: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[async_trait]
impl Installer for BrotliInstaller {
    fn tag(&self) -> &'static str {
        "BrotliInstaller"
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
        vec![
            "ngx_http_brotli_filter_module".to_string(),
            "ngx_http_brotli_static_module".to_string(),
        ]
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
        let path = ctx.build_dir().join("ngx_brotli");
        let opt = module_opt(self.dynamic, &path);

        // Submodules checked out means an earlier run got this far.
        let vendored = path.join("deps").join("brotli").join("c");
        if tokio::fs::try_exists(&vendored).await.unwrap_or(false) {
            debug!(path = %path.display(), "brotli already prepared");
            ctx.core().push_configure_opt(opt).await;
            return Ok(());
        }

        ctx.run_checked(CommandSpec::new("apt-get install -y libbrotli-dev"))
            .await?;

        debug!(path = %path.display(), "cloning brotli");
        ctx.git_clone(BROTLI_URL, &path, false).await?;

        let submodules = "git submodule update --init --recursive";
        let first = ctx.run(CommandSpec::new(submodules).cwd(&path)).await?;
        if first.failed() {
            // Usually a "dubious ownership" complaint when the checkout belongs
            // to the invoking user.
            warn!(stderr = %first.stderr, "submodule update failed, retrying as owner");
            ctx.run_checked(
                CommandSpec::new(submodules)
                    .cwd(&path)
                    .user(ctx.user().map(str::to_string)),
            )
            .await?;
        }

        ctx.core().push_configure_opt(opt).await;
        Ok(())
    }
}
