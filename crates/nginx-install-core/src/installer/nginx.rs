//! The nginx core: fetch, configure, make and install the server itself.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{downcast_eq, record_fields, Installer};
use crate::context::Context;
use crate::error::Result;
use crate::exec::{shell_quote, CommandSpec};
use crate::version::{parse_index, parse_openresty_index, Version, VersionSheet};

pub const NGINX_INDEX_URL: &str = "https://nginx.org/en/download.html";
pub const OPENRESTY_INDEX_URL: &str = "https://openresty.org/en/download.html";

/// File inside the source tree holding the version it was unpacked from.
pub const VERSION_STAMP: &str = ".nginx-install-version";

const BUILD_PACKAGES: &[&str] = &[
    "build-essential",
    "ca-certificates",
    "wget",
    "curl",
    "libpcre3",
    "libpcre3-dev",
    "autoconf",
    "unzip",
    "automake",
    "libtool",
    "tar",
    "git",
    "libssl-dev",
    "zlib1g-dev",
    "uuid-dev",
    "lsb-release",
    "libgeoip-dev",
    "cmake",
    "libperl-dev",
];

/// nginx distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Vanilla,
    Openresty,
}

fn default_configure_opts() -> Vec<String> {
    [
        "--http-client-body-temp-path=/var/cache/nginx/client_temp",
        "--http-proxy-temp-path=/var/cache/nginx/proxy_temp",
        "--http-fastcgi-temp-path=/var/cache/nginx/fastcgi_temp",
        "--http-scgi-temp-path=/var/cache/nginx/scgi_temp",
        "--http-uwsgi-temp-path=/var/cache/nginx/uwsgi_temp",
        "--with-pcre-jit",
        "--with-threads",
        "--with-file-aio",
        "--with-http_ssl_module",
        "--with-http_v2_module",
        "--with-http_v3_module",
        "--with-http_mp4_module",
        "--with-http_auth_request_module",
        "--with-http_slice_module",
        "--with-http_stub_status_module",
        "--with-http_realip_module",
        "--with-http_addition_module",
        "--with-http_sub_module",
        "--with-http_random_index_module",
        "--with-http_secure_link_module",
        "--with-http_degradation_module",
        "--with-http_gunzip_module",
        "--with-http_gzip_static_module",
        "--with-http_perl_module",
        "--with-http_geoip_module",
        "--with-stream",
        "--with-stream_ssl_module",
        "--with-stream_realip_module",
        "--with-mail=dynamic",
        "--with-mail_ssl_module",
    ]
    .map(str::to_string)
    .to_vec()
}

fn default_cc_opts() -> Vec<String> {
    [
        "-Wno-deprecated-declarations",
        "-Wno-ignore-qualifiers",
        "-O3",
        "-march=native",
        "-fPIC",
        "-Wdate-time",
        "-D_FORTIFY_SOURCE=2",
        "-funroll-loops",
        "-ffunction-sections",
        "-fdata-sections",
        "-Wl,--gc-sections",
    ]
    .map(str::to_string)
    .to_vec()
}

/// Settings of the nginx core build. Always enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreInstaller {
    /// `stable`, `mainline`, `latest`, an exact version or a range
    pub nginx_version: String,
    pub flavor: Flavor,
    pub config_prefix: PathBuf,
    pub config_name: String,
    pub sbin_path: PathBuf,
    pub modules_path: PathBuf,
    pub error_log_path: PathBuf,
    pub http_log_path: PathBuf,
    pub pid_path: PathBuf,
    pub lock_path: PathBuf,
    pub cache_path: PathBuf,
    pub unit_path: PathBuf,
    pub user: String,
    pub group: String,
    pub configure_opts: Vec<String>,
    pub cc_opts: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for CoreInstaller {
    fn default() -> Self {
        CoreInstaller {
            nginx_version: "stable".to_string(),
            flavor: Flavor::Vanilla,
            config_prefix: PathBuf::from("/etc/nginx"),
            config_name: "nginx.conf".to_string(),
            sbin_path: PathBuf::from("/usr/sbin/nginx"),
            modules_path: PathBuf::from("/usr/lib/nginx/modules"),
            error_log_path: PathBuf::from("/var/log/nginx/error.log"),
            http_log_path: PathBuf::from("/var/log/nginx/access.log"),
            pid_path: PathBuf::from("/run/nginx.pid"),
            lock_path: PathBuf::from("/run/nginx.lock"),
            cache_path: PathBuf::from("/var/cache/nginx"),
            unit_path: PathBuf::from("/etc/systemd/system/nginx.service"),
            user: "www-data".to_string(),
            group: "www-data".to_string(),
            configure_opts: default_configure_opts(),
            cc_opts: default_cc_opts(),
            extra: BTreeMap::new(),
        }
    }
}

impl CoreInstaller {
    pub fn config_path(&self) -> PathBuf {
        self.config_prefix.join(&self.config_name)
    }

    /// Full `./configure` argument list.
    ///
    /// All compiler flags go into a single `--with-cc-opt`, since configure
    /// only honours the last one given.
    pub fn build_options(&self, configure_opts: &[String], cc_opts: &[String]) -> Vec<String> {
        let mut opts = configure_opts.to_vec();
        if !cc_opts.is_empty() {
            opts.push(format!("--with-cc-opt={}", cc_opts.join(" ")));
        }
        opts.push(format!("--prefix={}", self.config_prefix.display()));
        opts.push(format!("--sbin-path={}", self.sbin_path.display()));
        opts.push(format!("--conf-path={}", self.config_path().display()));
        opts.push(format!("--modules-path={}", self.modules_path.display()));
        opts.push(format!("--error-log-path={}", self.error_log_path.display()));
        opts.push(format!("--http-log-path={}", self.http_log_path.display()));
        opts.push(format!("--pid-path={}", self.pid_path.display()));
        opts.push(format!("--lock-path={}", self.lock_path.display()));
        opts.push(format!("--user={}", self.user));
        opts.push(format!("--group={}", self.group));
        opts
    }

    pub fn index_url(&self) -> &'static str {
        match self.flavor {
            Flavor::Vanilla => NGINX_INDEX_URL,
            Flavor::Openresty => OPENRESTY_INDEX_URL,
        }
    }

    pub fn parse_versions(&self, page: &str) -> Result<VersionSheet> {
        match self.flavor {
            Flavor::Vanilla => parse_index(page),
            Flavor::Openresty => parse_openresty_index(page),
        }
    }

    /// Fetch the release index for this flavor and resolve `nginx_version`.
    pub async fn resolve_version(&self, ctx: &Context) -> Result<Version> {
        let page = ctx.fetch_text(self.index_url()).await?;
        let sheet = self.parse_versions(&page)?;
        debug!(
            mainline = %sheet.mainline(),
            stable = %sheet.stable(),
            legacies = ?sheet.legacies(),
            "release index"
        );
        sheet.resolve(&self.nginx_version)
    }

    /// Source directory name and tarball URL for `version`.
    pub fn source_for(&self, version: &Version) -> (String, String) {
        match self.flavor {
            Flavor::Vanilla => {
                let name = format!("nginx-{version}");
                let url = format!("https://nginx.org/download/{name}.tar.gz");
                (name, url)
            }
            Flavor::Openresty => {
                let legacy = Version::new(1, 9, 7).with_flavor(2);
                let prefix = if *version <= legacy {
                    "ngx_openresty"
                } else {
                    "openresty"
                };
                let name = format!("{prefix}-{}", version.dotted());
                let url = format!("https://openresty.org/download/{name}.tar.gz");
                (name, url)
            }
        }
    }

    /// systemd unit for the installed binary.
    pub fn unit_file(&self) -> String {
        let sbin = self.sbin_path.display();
        format!(
            "[Unit]
Description=The NGINX HTTP and reverse proxy server
After=syslog.target network-online.target remote-fs.target nss-lookup.target
Wants=network-online.target

[Service]
Type=forking
PIDFile={pid}
ExecStartPre={sbin} -t
ExecStart={sbin}
ExecReload={sbin} -s reload
ExecStop=/bin/kill -s QUIT $MAINPID
TimeoutStopSec=15
PrivateTmp=true

[Install]
WantedBy=multi-user.target
",
            pid = self.pid_path.display(),
        )
    }

    /// Test the installed configuration and reload the running server.
    pub async fn reload(&self, ctx: &Context) -> Result<()> {
        let sbin = shell_quote(&self.sbin_path.to_string_lossy());
        ctx.run_checked(CommandSpec::new(format!("{sbin} -t"))).await?;
        ctx.run_checked(CommandSpec::new(format!("{sbin} -s reload")))
            .await?;
        Ok(())
    }

    async fn fetch_sources(&self, ctx: &Context) -> Result<()> {
        let version = self.resolve_version(ctx).await?;
        info!(version = %version, flavor = ?self.flavor, "resolved nginx version");
        ctx.core().set_resolved_version(version.clone()).await;

        let (name, url) = self.source_for(&version);
        let build_dir = ctx.build_dir();
        let tarball = build_dir.join(format!("{name}.tar.gz"));
        let src = ctx.nginx_src_dir();

        ctx.run_checked(CommandSpec::new("apt-get update")).await?;
        let install = ctx
            .run(CommandSpec::new(format!(
                "apt-get install -y {}",
                BUILD_PACKAGES.join(" ")
            )))
            .await?;
        if install.failed() {
            warn!(stderr = %install.stderr, "installing build packages failed");
        }

        debug!(path = %src.display(), "removing old source tree");
        ctx.run_checked(CommandSpec::new(format!("rm -rf {}", quote_path(&src))))
            .await?;

        info!(url = %url, "downloading nginx source");
        ctx.download(&url, &tarball, "Get nginx source").await?;

        ctx.run_checked(CommandSpec::new(format!(
            "tar -xzf {} -C {}",
            quote_path(&tarball),
            quote_path(build_dir)
        )))
        .await?;
        ctx.run_checked(CommandSpec::new(format!(
            "mv {} {}",
            quote_path(&build_dir.join(&name)),
            quote_path(&src)
        )))
        .await?;

        if !ctx.dry_run() && tokio::fs::try_exists(&src).await.unwrap_or(false) {
            tokio::fs::write(src.join(VERSION_STAMP), version.to_string()).await?;
        }
        Ok(())
    }

    async fn ensure_account(&self, ctx: &Context) -> Result<()> {
        let group = shell_quote(&self.group);
        let user = shell_quote(&self.user);

        if ctx
            .run(CommandSpec::new(format!("getent group {group}")))
            .await?
            .failed()
        {
            debug!(group = %self.group, "creating group");
            ctx.run_checked(CommandSpec::new(format!("addgroup {group}")))
                .await?;
        }

        if ctx
            .run(CommandSpec::new(format!("getent passwd {user}")))
            .await?
            .failed()
        {
            debug!(user = %self.user, "creating user");
            ctx.run_checked(CommandSpec::new(format!(
                "adduser --system --no-create-home {user}"
            )))
            .await?;
        }

        ctx.run_checked(CommandSpec::new(format!("usermod -aG {group} {user}")))
            .await?;
        Ok(())
    }

    async fn create_layout(&self, ctx: &Context) -> Result<()> {
        if ctx.dry_run() {
            return Ok(());
        }
        debug!(path = %self.unit_path.display(), "writing unit file");
        if let Some(parent) = self.unit_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.unit_path, self.unit_file()).await?;

        for dir in [
            self.modules_path.clone(),
            self.cache_path.clone(),
            self.config_prefix.join("sites-available"),
            self.config_prefix.join("sites-enabled"),
            self.config_prefix.join("conf.d"),
        ] {
            debug!(path = %dir.display(), "creating directory");
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Version recorded in a source tree by an earlier prepare.
async fn read_version_stamp(src: &Path) -> Option<Version> {
    let raw = tokio::fs::read_to_string(src.join(VERSION_STAMP)).await.ok()?;
    Version::parse(&raw).ok()
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

#[async_trait]
impl Installer for CoreInstaller {
    fn tag(&self) -> &'static str {
        "CoreInstaller"
    }

    fn enabled(&self) -> bool {
        true
    }

    fn set_enabled(&mut self, _enabled: bool) {}

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
        info!(flavor = ?self.flavor, "start preparing nginx");

        if self.flavor == Flavor::Openresty {
            ctx.disable("NginxDevKitInstaller", "OpenResty already has one")
                .await;
            ctx.disable("HeadersMoreInstaller", "OpenResty already has one")
                .await;
        }

        if ctx.has_core_built().await {
            match read_version_stamp(&ctx.nginx_src_dir()).await {
                Some(version) => ctx.core().set_resolved_version(version).await,
                None => debug!("built source tree has no version stamp"),
            }
            info!("nginx source has already been built, skipping download");
            return Ok(());
        }

        self.fetch_sources(ctx).await?;
        info!("nginx preparation completed");
        Ok(())
    }

    async fn build(&self, ctx: &Context) -> Result<()> {
        info!("start building nginx");
        let src = ctx.nginx_src_dir();
        let configure_opts = ctx.core().configure_opts().await;
        let cc_opts = ctx.core().cc_opts().await;
        let args: Vec<String> = self
            .build_options(&configure_opts, &cc_opts)
            .iter()
            .map(|opt| shell_quote(opt))
            .collect();

        ctx.run_checked(CommandSpec::new(format!("./configure {}", args.join(" "))).cwd(&src))
            .await?;

        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        ctx.run_checked(CommandSpec::new(format!("make -j {jobs}")).cwd(&src))
            .await?;

        info!("nginx build completed");
        Ok(())
    }

    async fn install(&self, ctx: &Context) -> Result<()> {
        info!("start installing nginx");
        ctx.run_checked(CommandSpec::new("make install").cwd(ctx.nginx_src_dir()))
            .await?;

        self.create_layout(ctx).await?;
        self.ensure_account(ctx).await?;

        ctx.run_checked(CommandSpec::new("systemctl enable nginx"))
            .await?;

        let owner = format!("{}:{}", self.user, self.group);
        for log in [&self.error_log_path, &self.http_log_path] {
            if !ctx.dry_run() {
                if let Some(parent) = log.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                if !tokio::fs::try_exists(log).await.unwrap_or(false) {
                    debug!(path = %log.display(), "creating log file");
                    tokio::fs::write(log, "").await?;
                }
            }
            ctx.run_checked(CommandSpec::new(format!(
                "chown {} {}",
                shell_quote(&owner),
                quote_path(log)
            )))
            .await?;
        }

        info!("nginx installation completed");
        Ok(())
    }

    async fn uninstall(&self, ctx: &Context) -> Result<()> {
        info!("start uninstalling nginx");
        let mut outputs = Vec::new();
        for path in [
            &self.sbin_path,
            &self.modules_path,
            &self.cache_path,
            &self.error_log_path,
            &self.http_log_path,
            &self.unit_path,
        ] {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!(path = %path.display(), "removing");
                outputs.push(
                    ctx.run(CommandSpec::new(format!("rm -rf {}", quote_path(path))))
                        .await?,
                );
            } else {
                debug!(path = %path.display(), "does not exist");
            }
        }

        // Best effort: try every path, then report the first failure.
        for output in outputs {
            output.check()?;
        }
        info!("nginx uninstallation completed");
        Ok(())
    }

    async fn clean(&self, ctx: &Context) -> Result<()> {
        let build_dir = ctx.build_dir();
        if tokio::fs::try_exists(build_dir).await.unwrap_or(false) {
            debug!(path = %build_dir.display(), "removing build directory");
            ctx.run_checked(CommandSpec::new(format!("rm -rf {}", quote_path(build_dir))))
                .await?;
        }
        info!("nginx cleaning completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options_single_cc_opt() {
        let core = CoreInstaller::default();
        let opts = core.build_options(&["--with-threads".to_string()], &core.cc_opts);
        assert_eq!(opts[0], "--with-threads");
        let cc: Vec<&String> = opts.iter().filter(|o| o.starts_with("--with-cc-opt=")).collect();
        assert_eq!(cc.len(), 1);
        assert!(cc[0].contains("-O3 -march=native"));
        assert!(opts.contains(&"--conf-path=/etc/nginx/nginx.conf".to_string()));
        assert_eq!(opts.last().unwrap(), "--group=www-data");
    }

    #[test]
    fn test_source_for_flavors() {
        let mut core = CoreInstaller::default();
        let (name, url) = core.source_for(&Version::new(1, 26, 2));
        assert_eq!(name, "nginx-1.26.2");
        assert_eq!(url, "https://nginx.org/download/nginx-1.26.2.tar.gz");

        core.flavor = Flavor::Openresty;
        let (name, url) = core.source_for(&Version::new(1, 25, 3).with_flavor(1));
        assert_eq!(name, "openresty-1.25.3.1");
        assert_eq!(url, "https://openresty.org/download/openresty-1.25.3.1.tar.gz");

        let (name, _) = core.source_for(&Version::new(1, 9, 7).with_flavor(2));
        assert_eq!(name, "ngx_openresty-1.9.7.2");
    }

    #[test]
    fn test_unit_file_uses_paths() {
        let unit = CoreInstaller::default().unit_file();
        assert!(unit.contains("PIDFile=/run/nginx.pid"));
        assert!(unit.contains("ExecReload=/usr/sbin/nginx -s reload"));
    }

    #[test]
    fn test_defaults_match_config_schema() {
        let core: CoreInstaller = serde_yaml::from_str("flavor: openresty").unwrap();
        assert_eq!(core.flavor, Flavor::Openresty);
        assert_eq!(core.nginx_version, "stable");
        assert_eq!(core.user, "www-data");
        assert!(core.configure_opts.contains(&"--with-http_v3_module".to_string()));
    }
}
