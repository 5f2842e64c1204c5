//! nginx.conf snippets for the modules a config builds.

use std::path::Path;

use crate::installer::Installer;

/// `load_module` lines for every enabled dynamic installer.
pub fn load_module_lines<'a>(
    modules_path: &Path,
    installers: impl IntoIterator<Item = &'a dyn Installer>,
) -> Vec<String> {
    installers
        .into_iter()
        .filter(|i| i.enabled() && i.is_dynamic())
        .flat_map(|i| i.ngx_module_names())
        .map(|name| format!("load_module {}/{name}.so;", modules_path.display()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::{BrotliInstaller, FancyIndexInstaller, ZlibInstaller};

    #[test]
    fn test_only_enabled_dynamic_modules() {
        let brotli = BrotliInstaller {
            enabled: true,
            dynamic: true,
            ..Default::default()
        };
        let fancy = FancyIndexInstaller {
            enabled: true,
            dynamic: false,
            ..Default::default()
        };
        let zlib = ZlibInstaller {
            enabled: true,
            ..Default::default()
        };
        let list: Vec<&dyn Installer> = vec![&brotli, &fancy, &zlib];
        let lines = load_module_lines(Path::new("/usr/lib/nginx/modules"), list);
        assert_eq!(
            lines,
            vec![
                "load_module /usr/lib/nginx/modules/ngx_http_brotli_filter_module.so;",
                "load_module /usr/lib/nginx/modules/ngx_http_brotli_static_module.so;",
            ]
        );
    }
}
