//! Builtin installers driven through a full prepare phase.

use std::sync::Arc;

use nginx_install_core::fakes::{FakeDownloader, FakeGitClient, FakeHarness};
use nginx_install_core::installer::{
    DynamicTLSSizeInstaller, GeoIP2Installer, OpenSSLInstaller, ZlibInstaller,
};
use nginx_install_core::{Action, ActionFlags, CoreInstaller, Installer, Orchestrator};

const NGINX_PAGE: &str = "Mainline version nginx-1.27.0 Stable version nginx-1.26.2 \
                          Legacy versions nginx-1.24.0";

const OPENSSL_PAGE: &str = r#"<h1 data-view-component="true" class="d-inline mr-3">OpenSSL 3.3.1</h1>"#;

#[tokio::test]
async fn test_tls_patch_matches_resolved_version() {
    let dir = tempfile::tempdir().unwrap();
    let harness = FakeHarness::new(
        FakeDownloader::new().with_page("https://nginx.org/en/download.html", NGINX_PAGE),
        FakeGitClient::new()
            .with_file("nginx__dynamic_tls_records_1.17.7.patch")
            .with_file("nginx__dynamic_tls_records_1.25.1+.patch")
            .with_file("nginx__dynamic_tls_records_1.27.0.patch"),
    );
    let installers: Vec<Arc<dyn Installer>> = vec![Arc::new(DynamicTLSSizeInstaller {
        enabled: true,
        ..Default::default()
    })];
    let ctx = harness.context(dir.path(), CoreInstaller::default(), &installers);
    let report = Orchestrator::new(ctx, installers)
        .run(Action::Prepare, ActionFlags::default())
        .await
        .unwrap();

    assert_eq!(report.nginx_version.as_deref(), Some("1.26.2"));
    let patch = harness
        .runner
        .calls()
        .into_iter()
        .find(|c| c.line.starts_with("patch -f -p1"))
        .unwrap();
    assert!(patch
        .line
        .ends_with("nginx__dynamic_tls_records_1.25.1+.patch"));
    assert_eq!(patch.cwd.as_deref(), Some(dir.path().join("nginx").as_path()));
    // The index is fetched once, by the core.
    assert_eq!(harness.downloader.page_hits().len(), 1);
}

#[tokio::test]
async fn test_tls_patch_missing_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let harness = FakeHarness::new(
        FakeDownloader::new().with_page("https://nginx.org/en/download.html", NGINX_PAGE),
        FakeGitClient::new().with_file("nginx__dynamic_tls_records_1.27.0.patch"),
    );
    let installers: Vec<Arc<dyn Installer>> = vec![Arc::new(DynamicTLSSizeInstaller {
        enabled: true,
        ..Default::default()
    })];
    let ctx = harness.context(dir.path(), CoreInstaller::default(), &installers);
    let err = Orchestrator::new(ctx, installers)
        .run(Action::Prepare, ActionFlags::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        nginx_install_core::InstallError::Resolution { .. }
    ));
}

#[tokio::test]
async fn test_openssl_and_zlib_register_with_core() {
    let dir = tempfile::tempdir().unwrap();
    let objs = dir.path().join("nginx").join("objs");
    std::fs::create_dir_all(&objs).unwrap();
    std::fs::write(objs.join("nginx"), b"").unwrap();

    let harness = FakeHarness::new(
        FakeDownloader::new().with_page(
            "https://github.com/openssl/openssl/releases/latest",
            OPENSSL_PAGE,
        ),
        FakeGitClient::new(),
    );
    let installers: Vec<Arc<dyn Installer>> = vec![
        Arc::new(OpenSSLInstaller {
            enabled: true,
            ..Default::default()
        }),
        Arc::new(ZlibInstaller {
            enabled: true,
            ..Default::default()
        }),
    ];
    let ctx = harness.context(dir.path(), CoreInstaller::default(), &installers);
    let report = Orchestrator::new(ctx, installers)
        .run(Action::Prepare, ActionFlags::default())
        .await
        .unwrap();

    let openssl_dir = dir.path().join("openssl-3.3.1");
    assert!(report
        .configure_opts
        .contains(&format!("--with-openssl={}", openssl_dir.display())));
    let zlib_dir = dir.path().join("cloudflare-zlib");
    assert!(report
        .configure_opts
        .contains(&format!("--with-zlib={}", zlib_dir.display())));

    let fetched = harness.downloader.fetched();
    assert_eq!(fetched.len(), 1);
    assert!(fetched[0].0.ends_with("openssl-3.3.1/openssl-3.3.1.tar.gz"));
    assert!(harness
        .runner
        .calls()
        .iter()
        .any(|c| c.line == "./config" && c.cwd.as_deref() == Some(openssl_dir.as_path())));
}

#[tokio::test]
async fn test_configured_openssl_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let objs = dir.path().join("nginx").join("objs");
    std::fs::create_dir_all(&objs).unwrap();
    std::fs::write(objs.join("nginx"), b"").unwrap();
    let prepared = dir.path().join("openssl-3.2.0");
    std::fs::create_dir_all(&prepared).unwrap();
    std::fs::write(prepared.join("configdata.pm"), b"").unwrap();

    let harness = FakeHarness::new(FakeDownloader::new(), FakeGitClient::new());
    let installers: Vec<Arc<dyn Installer>> = vec![Arc::new(OpenSSLInstaller {
        enabled: true,
        ..Default::default()
    })];
    let ctx = harness.context(dir.path(), CoreInstaller::default(), &installers);
    let report = Orchestrator::new(ctx, installers)
        .run(Action::Prepare, ActionFlags::default())
        .await
        .unwrap();

    assert!(report
        .configure_opts
        .contains(&format!("--with-openssl={}", prepared.display())));
    assert_eq!(harness.total_calls(), 0);
}

#[tokio::test]
async fn test_geoip2_without_credentials_only_adds_module() {
    let dir = tempfile::tempdir().unwrap();
    let objs = dir.path().join("nginx").join("objs");
    std::fs::create_dir_all(&objs).unwrap();
    std::fs::write(objs.join("nginx"), b"").unwrap();
    let lib = dir.path().join("libmaxminddb-1.10.0");
    std::fs::create_dir_all(&lib).unwrap();
    std::fs::write(lib.join("config.status"), b"").unwrap();

    let harness = FakeHarness::new(FakeDownloader::new(), FakeGitClient::new());
    let installers: Vec<Arc<dyn Installer>> = vec![Arc::new(GeoIP2Installer {
        enabled: true,
        dynamic: true,
        ..Default::default()
    })];
    let ctx = harness.context(dir.path(), CoreInstaller::default(), &installers);
    let report = Orchestrator::new(ctx, installers)
        .run(Action::Prepare, ActionFlags::default())
        .await
        .unwrap();

    let module = dir.path().join("ngx_http_geoip2_module");
    assert!(report
        .configure_opts
        .contains(&format!("--add-dynamic-module={}", module.display())));
    assert!(harness.downloader.fetched().is_empty());
    assert!(!harness.runner.ran("geoipupdate"));
    assert_eq!(harness.git.call_count(), 1);
}
