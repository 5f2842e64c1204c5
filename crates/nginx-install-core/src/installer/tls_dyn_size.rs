//! Dynamic TLS record sizing, applied as a patch to the nginx source.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{downcast_eq, record_fields, Flavor, Installer};
use crate::context::Context;
use crate::error::{InstallError, Result};
use crate::exec::{shell_quote, CommandSpec};
use crate::version::Version;

pub const TLS_DYN_SIZE_URL: &str = "https://github.com/nginx-modules/ngx_http_tls_dyn_size.git";

fn patch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^nginx__dynamic_tls_records_(\d+\.\d+\.\d+)\+?\.patch$")
            .expect("static patch regex")
    })
}

fn bundle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^nginx-\d+\.\d+\.\d+$").expect("static bundle regex"))
}

/// Newest patch targeting a version not above `target`.
pub fn pick_patch<'a>(names: impl IntoIterator<Item = &'a str>, target: &Version) -> Option<&'a str> {
    let target = target.release();
    names
        .into_iter()
        .filter_map(|name| {
            let caps = patch_re().captures(name)?;
            let version = Version::parse(&caps[1]).ok()?;
            (version <= target).then_some((version, name))
        })
        .max()
        .map(|(_, name)| name)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicTLSSizeInstaller {
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl DynamicTLSSizeInstaller {
    /// Directory the patch applies in: the nginx tree, or for OpenResty the
    /// bundled `nginx-x.y.z` inside it.
    async fn patch_anchor(&self, ctx: &Context) -> Result<PathBuf> {
        let src = ctx.nginx_src_dir();
        if ctx.core().settings().flavor != Flavor::Openresty || ctx.dry_run() {
            return Ok(src);
        }
        let bundle = src.join("bundle");
        let mut entries = tokio::fs::read_dir(&bundle).await?;
        while let Some(entry) = entries.next_entry().await? {
            if bundle_re().is_match(&entry.file_name().to_string_lossy()) {
                return Ok(entry.path());
            }
        }
        Ok(bundle)
    }

    async fn list_patches(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            // A dry run may not have a checkout to look at.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }
}

#[async_trait]
impl Installer for DynamicTLSSizeInstaller {
    fn tag(&self) -> &'static str {
        "DynamicTLSSizeInstaller"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn matches_name(&self, name: &str) -> bool {
        let wanted = name.trim().to_ascii_lowercase();
        [
            "dynamictlssizeinstaller",
            "dynamictlssize",
            "dynamicresizetls",
            "dynamicresizetlsinstaller",
        ]
        .contains(&wanted.as_str())
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
        // The patch went in before the previous build.
        if ctx.has_core_built().await {
            debug!("core already built, patch already applied");
            return Ok(());
        }

        let repo = ctx.build_dir().join("ngx_http_tls_dyn_size");
        ctx.git_clone(TLS_DYN_SIZE_URL, &repo, false).await?;

        let target = match ctx.core().resolved_version().await {
            Some(version) => version,
            None => ctx.core().settings().resolve_version(ctx).await?,
        };

        let names = Self::list_patches(&repo).await?;
        let patch = pick_patch(names.iter().map(String::as_str), &target)
            .ok_or_else(|| InstallError::Resolution {
                spec: format!("dynamic TLS records patch for nginx <= {target}"),
            })?
            .to_string();

        let anchor = self.patch_anchor(ctx).await?;
        debug!(patch = %patch, anchor = %anchor.display(), "applying patch");
        ctx.run_checked(
            CommandSpec::new(format!(
                "patch -f -p1 < {}",
                shell_quote(&repo.join(&patch).to_string_lossy())
            ))
            .cwd(&anchor),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_patch_newest_not_above_target() {
        let names = [
            "README.md",
            "nginx__dynamic_tls_records_1.17.7.patch",
            "nginx__dynamic_tls_records_1.25.1+.patch",
            "nginx__dynamic_tls_records_1.27.0.patch",
        ];
        let target = Version::new(1, 26, 2);
        assert_eq!(
            pick_patch(names, &target),
            Some("nginx__dynamic_tls_records_1.25.1+.patch")
        );
        assert_eq!(pick_patch(names, &Version::new(1, 10, 0)), None);
    }

    #[test]
    fn test_pick_patch_ignores_flavor() {
        let names = ["nginx__dynamic_tls_records_1.25.3.patch"];
        let target = Version::new(1, 25, 3).with_flavor(1);
        assert_eq!(pick_patch(names, &target), Some(names[0]));
    }
}
