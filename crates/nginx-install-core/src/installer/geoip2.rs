//! GeoIP2 lookups backed by libmaxminddb and the MaxMind databases.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{downcast_eq, find_prepared, module_opt, record_fields, Installer};
use crate::context::Context;
use crate::error::{InstallError, Result};
use crate::exec::{shell_quote, CommandSpec};
use crate::version::parse_release_heading;

pub const LIBMAXMINDDB_RELEASES_URL: &str = "https://github.com/maxmind/libmaxminddb/releases/latest";
pub const GEOIP2_MODULE_URL: &str = "https://github.com/leev/ngx_http_geoip2_module.git";

const DB_DIR: &str = "/opt/geoip";
const GEOIPUPDATE_CONF: &str = "/usr/local/etc/GeoIP.conf";
const GEOIPUPDATE_CRON: &str = "/etc/cron.d/geoipupdate";
const LD_CONF: &str = "/etc/ld.so.conf.d/local.conf";

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIP2Installer {
    pub enabled: bool,
    pub dynamic: bool,
    /// MaxMind account, overridden by `MAXMIND_ID`
    pub account_id: String,
    /// MaxMind license key, overridden by `MAXMIND_KEY`
    pub license_key: String,
    pub edition_ids: Vec<String>,
    pub enable_auto_update: bool,
    pub auto_update_cron: String,
    /// Extra `./configure` flags for libmaxminddb
    pub configure_opts: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for GeoIP2Installer {
    fn default() -> Self {
        GeoIP2Installer {
            enabled: false,
            dynamic: false,
            account_id: String::new(),
            license_key: String::new(),
            edition_ids: vec![
                "GeoLite2-ASN".to_string(),
                "GeoLite2-City".to_string(),
                "GeoLite2-Country".to_string(),
            ],
            enable_auto_update: true,
            auto_update_cron: "0 0 * * 0".to_string(),
            configure_opts: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for GeoIP2Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.license_key.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("GeoIP2Installer")
            .field("enabled", &self.enabled)
            .field("dynamic", &self.dynamic)
            .field("account_id", &self.account_id)
            .field("license_key", &key)
            .field("edition_ids", &self.edition_ids)
            .field("enable_auto_update", &self.enable_auto_update)
            .field("auto_update_cron", &self.auto_update_cron)
            .field("configure_opts", &self.configure_opts)
            .field("extra", &self.extra)
            .finish()
    }
}

/// MaxMind credentials, from the environment or the config.
struct Credentials {
    account_id: String,
    license_key: String,
}

impl Credentials {
    fn present(&self) -> bool {
        !self.account_id.is_empty() && !self.license_key.is_empty()
    }
}

fn quote(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

impl GeoIP2Installer {
    fn credentials(&self) -> Credentials {
        Credentials {
            account_id: std::env::var("MAXMIND_ID").unwrap_or_else(|_| self.account_id.clone()),
            license_key: std::env::var("MAXMIND_KEY").unwrap_or_else(|_| self.license_key.clone()),
        }
    }

    fn database_url(edition: &str, license_key: &str) -> String {
        format!(
            "https://download.maxmind.com/app/geoip_download?edition_id={edition}&license_key={license_key}&suffix=tar.gz"
        )
    }

    async fn build_libmaxminddb(&self, ctx: &Context) -> Result<()> {
        let build_dir = ctx.build_dir();
        if let Some(dir) = find_prepared(build_dir, "libmaxminddb-", "config.status").await {
            debug!(path = %dir.display(), "libmaxminddb already built");
            return Ok(());
        }

        let page = ctx.fetch_text(LIBMAXMINDDB_RELEASES_URL).await?;
        let version = parse_release_heading(&page).ok_or_else(|| InstallError::IndexParse {
            source_name: "libmaxminddb releases page".to_string(),
            reason: "no release heading found".to_string(),
        })?;
        debug!(version = %version, "latest libmaxminddb release");

        let name = format!("libmaxminddb-{version}");
        let tarball = build_dir.join(format!("{name}.tar.gz"));
        ctx.download(
            &format!("https://github.com/maxmind/libmaxminddb/releases/download/{version}/{name}.tar.gz"),
            &tarball,
            "Get libmaxminddb source",
        )
        .await?;

        ctx.run_checked(CommandSpec::new(format!(
            "tar -xzf {} -C {}",
            quote(&tarball),
            quote(build_dir)
        )))
        .await?;

        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let opts: Vec<String> = self.configure_opts.iter().map(|o| shell_quote(o)).collect();
        ctx.run_checked(
            CommandSpec::new(format!(
                "./configure {} && make -j {jobs} && make check && make install",
                opts.join(" ")
            ))
            .cwd(build_dir.join(&name)),
        )
        .await?;

        let ldconfig = ctx.run(CommandSpec::new("ldconfig")).await?;
        if ldconfig.failed() {
            warn!(stderr = %ldconfig.stderr, "ldconfig failed, adding /usr/local/lib to the loader path");
            if !ctx.dry_run() {
                let current = tokio::fs::read_to_string(LD_CONF).await.unwrap_or_default();
                if !current.contains("/usr/local/lib") {
                    tokio::fs::write(LD_CONF, format!("{current}/usr/local/lib\n")).await?;
                }
            }
            ctx.run_checked(CommandSpec::new("ldconfig")).await?;
        }
        Ok(())
    }

    /// Download the edition databases not fetched yet. Returns the editions
    /// fetched by this call.
    async fn fetch_databases(&self, ctx: &Context, creds: &Credentials) -> Result<Vec<String>> {
        if !creds.present() {
            warn!("account ID and license key are not set, skipping GeoIP2 databases");
            return Ok(Vec::new());
        }

        let build_dir = ctx.build_dir();
        let mut pending = Vec::new();
        for edition in &self.edition_ids {
            let tarball = build_dir.join(format!("{edition}.tar.gz"));
            if !tokio::fs::try_exists(&tarball).await.unwrap_or(false) {
                pending.push((edition.clone(), tarball));
            }
        }
        if pending.is_empty() {
            debug!("GeoIP2 databases already downloaded");
            return Ok(Vec::new());
        }

        debug!(editions = ?pending.iter().map(|(e, _)| e).collect::<Vec<_>>(), "downloading GeoIP2 databases");
        try_join_all(pending.iter().map(|(edition, tarball)| {
            let url = Self::database_url(edition, &creds.license_key);
            let title = format!("Get {edition}");
            async move { ctx.download(&url, tarball, &title).await }
        }))
        .await?;

        for (edition, tarball) in &pending {
            let prefix = build_dir.join(edition);
            ctx.run_checked(CommandSpec::new(format!(
                "tar -xzf {} -C {} && mkdir -p {DB_DIR} && cp -rf {}_* {DB_DIR}",
                quote(tarball),
                quote(build_dir),
                quote(&prefix)
            )))
            .await?;
        }

        Ok(pending.into_iter().map(|(edition, _)| edition).collect())
    }

    async fn enable_auto_update(&self, ctx: &Context, creds: &Credentials, editions: &[String]) -> Result<()> {
        debug!("installing geoipupdate");
        ctx.run_checked(CommandSpec::new("apt-get update && apt-get install -y geoipupdate"))
            .await?;

        if !ctx.dry_run() {
            let conf = format!(
                "AccountID {}\nLicenseKey {}\nEditionIDs {}\n",
                creds.account_id,
                creds.license_key,
                editions.join(" ")
            );
            if let Some(parent) = Path::new(GEOIPUPDATE_CONF).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(GEOIPUPDATE_CONF, conf).await?;
        }

        ctx.run_checked(CommandSpec::new(format!(
            "echo \"{} root `which geoipupdate`\" > {GEOIPUPDATE_CRON}",
            self.auto_update_cron
        )))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for GeoIP2Installer {
    fn tag(&self) -> &'static str {
        "GeoIP2Installer"
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
        vec!["ngx_http_geoip2_module".to_string()]
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
        let creds = self.credentials();

        self.build_libmaxminddb(ctx).await?;
        let fetched = self.fetch_databases(ctx, &creds).await?;
        if !fetched.is_empty() && self.enable_auto_update {
            self.enable_auto_update(ctx, &creds, &self.edition_ids).await?;
        }

        let path = ctx.build_dir().join("ngx_http_geoip2_module");
        debug!(path = %path.display(), "cloning GeoIP2 module");
        ctx.git_clone(GEOIP2_MODULE_URL, &path, false).await?;

        ctx.core()
            .push_configure_opt(module_opt(self.dynamic, &path))
            .await;
        Ok(())
    }

    async fn uninstall(&self, ctx: &Context) -> Result<()> {
        ctx.notify(format!(
            "{}: cannot determine dependencies to remove. You may need to manually remove \
             {DB_DIR}, {GEOIPUPDATE_CRON}, {GEOIPUPDATE_CONF}, geoipupdate and \
             /usr/local/lib/libmaxminddb.so",
            self.label()
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_license_key() {
        let inst = GeoIP2Installer {
            license_key: "s3cret".to_string(),
            ..Default::default()
        };
        let shown = format!("{inst:?}");
        assert!(!shown.contains("s3cret"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn test_defaults() {
        let inst = GeoIP2Installer::default();
        assert_eq!(inst.edition_ids.len(), 3);
        assert!(inst.enable_auto_update);
        assert_eq!(inst.auto_update_cron, "0 0 * * 0");
    }
}
