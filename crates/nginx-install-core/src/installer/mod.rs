//! The installer lifecycle and the builtin installers.
//!
//! Every installer goes through `prepare → build → install → uninstall →
//! clean`. Only the core does real work past `prepare`; optional modules
//! fetch their sources and append to the core's configure options.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::context::Context;
use crate::error::{InstallError, Result};

pub mod brotli;
pub mod fancyindex;
pub mod geoip2;
pub mod git_module;
pub mod headers_more;
pub mod ndk;
pub mod nginx;
pub mod openssl;
pub mod subfilter;
pub mod tls_dyn_size;
pub mod zlib;

pub use self::brotli::BrotliInstaller;
pub use self::fancyindex::FancyIndexInstaller;
pub use self::geoip2::GeoIP2Installer;
pub use self::git_module::GenericGitInstaller;
pub use self::headers_more::HeadersMoreInstaller;
pub use self::ndk::NginxDevKitInstaller;
pub use self::nginx::{CoreInstaller, Flavor};
pub use self::openssl::OpenSSLInstaller;
pub use self::subfilter::SubFilterInstaller;
pub use self::tls_dyn_size::DynamicTLSSizeInstaller;
pub use self::zlib::ZlibInstaller;

/// Namespace of the installers shipped with this crate.
pub const BUILTIN_NAMESPACE: &str = "builtin";

/// One nginx module (or the core itself) with its lifecycle.
#[async_trait]
pub trait Installer: Send + Sync + fmt::Debug + 'static {
    /// Stable type tag, written as `classname` in config records
    fn tag(&self) -> &'static str;

    /// Registry namespace, written as `modulename` unless builtin
    fn namespace(&self) -> &str {
        BUILTIN_NAMESPACE
    }

    fn enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Whether the module is built as a dynamic `.so`.
    fn is_dynamic(&self) -> bool {
        false
    }

    /// Switch dynamic builds on or off. Returns `false` when the installer
    /// has no dynamic variant.
    fn set_dynamic(&mut self, _dynamic: bool) -> bool {
        false
    }

    /// Names of the `.so` files a dynamic build produces.
    fn ngx_module_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human readable label used in logs.
    fn label(&self) -> String {
        format!("{}()", self.tag())
    }

    /// Whether `name` refers to this installer, as typed on the command line.
    fn matches_name(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        let tag = self.tag().to_ascii_lowercase();
        name == tag || tag.strip_suffix("installer") == Some(name.as_str())
    }

    /// Whether `other` installs the same module. Differs from structural
    /// equality for git modules, which are identified by URL.
    fn same_module(&self, other: &dyn Installer) -> bool {
        self.namespace() == other.namespace() && self.tag() == other.tag()
    }

    /// Variant fields for the config record, without the tag.
    fn fields(&self) -> Result<serde_yaml::Mapping>;

    fn as_any(&self) -> &dyn Any;

    /// Structural equality across trait objects.
    fn eq_installer(&self, other: &dyn Installer) -> bool;

    async fn prepare(&self, ctx: &Context) -> Result<()>;

    async fn build(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn install(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn uninstall(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn clean(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

impl PartialEq for dyn Installer {
    fn eq(&self, other: &dyn Installer) -> bool {
        self.eq_installer(other)
    }
}

/// Serialize an installer's fields into a YAML mapping.
pub fn record_fields<T: Serialize>(value: &T) -> Result<serde_yaml::Mapping> {
    match serde_yaml::to_value(value)? {
        serde_yaml::Value::Mapping(map) => Ok(map),
        serde_yaml::Value::Null => Ok(serde_yaml::Mapping::new()),
        other => Err(InstallError::ConfigValidation(format!(
            "installer fields must be a mapping, got {other:?}"
        ))),
    }
}

/// Structural equality helper for [`Installer::eq_installer`].
pub fn downcast_eq<T: PartialEq + 'static>(this: &T, other: &dyn Installer) -> bool {
    other
        .as_any()
        .downcast_ref::<T>()
        .map(|other| other == this)
        .unwrap_or(false)
}

/// `--add-module=<path>` or `--add-dynamic-module=<path>`.
pub fn module_opt(dynamic: bool, path: impl AsRef<Path>) -> String {
    let kind = if dynamic { "-dynamic" } else { "" };
    format!("--add{kind}-module={}", path.as_ref().display())
}

/// First `<build_dir>/<prefix>*` directory holding `marker`, i.e. a source
/// tree an earlier run already unpacked and configured.
pub(crate) async fn find_prepared(build_dir: &Path, prefix: &str, marker: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(build_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }
        let path = entry.path();
        if tokio::fs::try_exists(path.join(marker)).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// The optional installers a fresh config lists, all disabled.
pub fn default_installers() -> Vec<Box<dyn Installer>> {
    vec![
        Box::new(OpenSSLInstaller::default()),
        Box::new(HeadersMoreInstaller::default()),
        Box::new(FancyIndexInstaller::default()),
        Box::new(DynamicTLSSizeInstaller::default()),
        Box::new(BrotliInstaller::default()),
        Box::new(GeoIP2Installer::default()),
        Box::new(ZlibInstaller::default()),
        Box::new(GenericGitInstaller::default()),
        Box::new(SubFilterInstaller::default()),
        Box::new(NginxDevKitInstaller::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_opt() {
        assert_eq!(module_opt(false, "../ngx_brotli"), "--add-module=../ngx_brotli");
        assert_eq!(
            module_opt(true, "/b/ngx-fancyindex"),
            "--add-dynamic-module=/b/ngx-fancyindex"
        );
    }

    #[test]
    fn test_default_installers_are_disabled() {
        let defaults = default_installers();
        assert_eq!(defaults.len(), 10);
        assert!(defaults.iter().all(|i| !i.enabled()));
    }

    #[test]
    fn test_matches_name() {
        let brotli = BrotliInstaller::default();
        assert!(brotli.matches_name("BrotliInstaller"));
        assert!(brotli.matches_name("brotli"));
        assert!(!brotli.matches_name("zlib"));
    }

    #[test]
    fn test_same_module_vs_structural_eq() {
        let a = FancyIndexInstaller::default();
        let mut b = FancyIndexInstaller::default();
        b.dynamic = true;
        assert!(a.same_module(&b));
        assert!(!a.eq_installer(&b));
        assert!(!a.same_module(&BrotliInstaller::default()));
    }
}
