//! Build against the latest OpenSSL release instead of the system library.

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{downcast_eq, find_prepared, record_fields, Installer};
use crate::context::Context;
use crate::error::{InstallError, Result};
use crate::exec::{shell_quote, CommandSpec};
use crate::version::parse_release_heading;

pub const OPENSSL_RELEASES_URL: &str = "https://github.com/openssl/openssl/releases/latest";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSSLInstaller {
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[async_trait]
impl Installer for OpenSSLInstaller {
    fn tag(&self) -> &'static str {
        "OpenSSLInstaller"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
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
        let build_dir = ctx.build_dir();

        if let Some(dir) = find_prepared(build_dir, "openssl-", "configdata.pm").await {
            debug!(path = %dir.display(), "openssl already configured");
            ctx.core()
                .push_configure_opt(format!("--with-openssl={}", dir.display()))
                .await;
            return Ok(());
        }

        let page = ctx.fetch_text(OPENSSL_RELEASES_URL).await?;
        let version = parse_release_heading(&page).ok_or_else(|| InstallError::IndexParse {
            source_name: "OpenSSL releases page".to_string(),
            reason: "no release heading found".to_string(),
        })?;
        debug!(version = %version, "latest OpenSSL release");

        let name = format!("openssl-{version}");
        let tarball = build_dir.join(format!("{name}.tar.gz"));
        ctx.download(
            &format!("https://github.com/openssl/openssl/releases/download/{name}/{name}.tar.gz"),
            &tarball,
            "Get openssl source",
        )
        .await?;

        ctx.run_checked(CommandSpec::new(format!(
            "tar -xzf {} -C {}",
            shell_quote(&tarball.to_string_lossy()),
            shell_quote(&build_dir.to_string_lossy())
        )))
        .await?;

        let dir = build_dir.join(&name);
        ctx.run_checked(CommandSpec::new("./config").cwd(&dir)).await?;

        ctx.core()
            .push_configure_opt(format!("--with-openssl={}", dir.display()))
            .await;
        Ok(())
    }
}
