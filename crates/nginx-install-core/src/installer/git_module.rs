//! Modules that only need a `git clone` plus `--add-module`.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{downcast_eq, module_opt, record_fields, Installer};
use crate::context::Context;
use crate::error::{InstallError, Result};
use crate::exec::CommandSpec;

/// Written into a checkout once its post clone commands have all succeeded.
const POST_CMDS_MARKER: &str = ".nginx-install-post-cmds";

/// Clone `url` into `<build_dir>/<dest>`, run `post_cmds` inside the
/// checkout until they have succeeded once, and register the module with
/// the core.
pub(crate) async fn prepare_git_module(
    ctx: &Context,
    url: &str,
    dest: &str,
    post_cmds: &[String],
    dynamic: bool,
) -> Result<()> {
    let path = ctx.build_dir().join(dest);
    debug!(url = %url, path = %path.display(), "preparing git module");

    ctx.git_clone(url, &path, false).await?;

    let marker = path.join(POST_CMDS_MARKER);
    if !post_cmds.is_empty() && !tokio::fs::try_exists(&marker).await.unwrap_or(false) {
        for cmd in post_cmds {
            debug!(command = %cmd, "running post clone command");
            ctx.run_checked(CommandSpec::new(cmd.as_str()).cwd(&path))
                .await?;
        }
        if !ctx.dry_run() {
            tokio::fs::write(&marker, b"").await?;
        }
    }

    ctx.core().push_configure_opt(module_opt(dynamic, &path)).await;
    Ok(())
}

/// Any module hosted in a git repository.
///
/// `name` picks the checkout directory (the repository name when empty),
/// `post_cmds` run inside the checkout until they succeed, and
/// `ngx_modulenames` lists the `.so` files a dynamic build produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericGitInstaller {
    pub enabled: bool,
    pub dynamic: bool,
    pub name: String,
    pub url: String,
    pub post_cmds: Vec<String>,
    pub ngx_modulenames: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl GenericGitInstaller {
    pub fn new(url: impl Into<String>) -> Self {
        GenericGitInstaller {
            enabled: true,
            url: url.into(),
            ..Default::default()
        }
    }

    /// Checkout directory name under the build dir.
    pub fn git_dest(&self) -> String {
        let raw = if self.name.trim().is_empty() {
            repo_name(self.url.trim()).unwrap_or_else(|| self.url.trim().to_string())
        } else {
            self.name.trim().to_string()
        };
        sanitize(&raw)
    }
}

/// Last path segment of `url` without `.git`, or the host for bare URLs.
fn repo_name(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| s.trim_end_matches(".git").to_string())
        .filter(|s| !s.is_empty());
    segment.or_else(|| parsed.host_str().map(str::to_string))
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "git-module".to_string(),
        _ => cleaned,
    }
}

#[async_trait]
impl Installer for GenericGitInstaller {
    fn tag(&self) -> &'static str {
        "GenericGitInstaller"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        // Nothing to clone without a URL.
        self.enabled = enabled && !self.url.trim().is_empty();
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn set_dynamic(&mut self, dynamic: bool) -> bool {
        self.dynamic = dynamic;
        true
    }

    fn ngx_module_names(&self) -> Vec<String> {
        self.ngx_modulenames.clone()
    }

    fn label(&self) -> String {
        format!("{}({})", self.tag(), self.git_dest())
    }

    fn matches_name(&self, name: &str) -> bool {
        let wanted = name.trim().to_ascii_lowercase();
        let tag = self.tag().to_ascii_lowercase();
        wanted == tag
            || tag.strip_suffix("installer") == Some(wanted.as_str())
            || (!self.name.is_empty() && self.name.to_ascii_lowercase() == wanted)
    }

    fn same_module(&self, other: &dyn Installer) -> bool {
        other
            .as_any()
            .downcast_ref::<GenericGitInstaller>()
            .map(|other| other.url == self.url)
            .unwrap_or(false)
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
        if self.url.trim().is_empty() {
            return Err(InstallError::ConfigValidation(format!(
                "{}: url is empty",
                self.label()
            )));
        }
        prepare_git_module(
            ctx,
            self.url.trim(),
            &self.git_dest(),
            &self.post_cmds,
            self.dynamic,
        )
        .await
    }
}

/// Source directory of a git module inside the build dir.
pub fn module_dir(build_dir: &Path, installer: &GenericGitInstaller) -> std::path::PathBuf {
    build_dir.join(installer.git_dest())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_dest_defaults_to_repo_name() {
        let inst = GenericGitInstaller::new("https://github.com/vozlt/nginx-module-vts.git");
        assert_eq!(inst.git_dest(), "nginx-module-vts");
        assert_eq!(
            GenericGitInstaller::new("https://example.com/").git_dest(),
            "example.com"
        );

        let mut named = inst.clone();
        named.name = "vts/module".to_string();
        assert_eq!(named.git_dest(), "vts_module");
        assert_eq!(
            module_dir(Path::new("/b"), &named),
            Path::new("/b/vts_module")
        );
    }

    #[test]
    fn test_same_module_by_url() {
        let a = GenericGitInstaller::new("https://example.com/a.git");
        let mut a2 = GenericGitInstaller::new("https://example.com/a.git");
        a2.dynamic = true;
        let b = GenericGitInstaller::new("https://example.com/b.git");
        assert!(a.same_module(&a2));
        assert!(!a.same_module(&b));
        assert!(!a.eq_installer(&a2));
    }

    #[test]
    fn test_enable_requires_url() {
        let mut inst = GenericGitInstaller::default();
        inst.set_enabled(true);
        assert!(!inst.enabled());
        inst.url = "https://example.com/x.git".to_string();
        inst.set_enabled(true);
        assert!(inst.enabled());
    }
}
