//! Maps `(namespace, classname)` config records to installer variants.
//!
//! A record is a YAML mapping holding `classname`, an optional `modulename`
//! (the registry namespace, omitted for builtin installers) and the
//! variant's fields. Installers from other crates join by calling
//! [`Registry::register`] before the config is loaded.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::{InstallError, Result};
use crate::installer::{
    BrotliInstaller, DynamicTLSSizeInstaller, FancyIndexInstaller, GenericGitInstaller,
    GeoIP2Installer, HeadersMoreInstaller, Installer, NginxDevKitInstaller, OpenSSLInstaller,
    SubFilterInstaller, ZlibInstaller, BUILTIN_NAMESPACE,
};

pub const CLASSNAME_KEY: &str = "classname";
pub const MODULENAME_KEY: &str = "modulename";

/// Namespace older config files recorded for builtin installers, alone or
/// followed by the module path (`nginx_install.installers.brotli`).
pub const LEGACY_NAMESPACE: &str = "nginx_install.installers";

/// Fold legacy builtin namespaces into [`BUILTIN_NAMESPACE`].
pub fn canonical_namespace(namespace: &str) -> &str {
    let legacy = namespace == LEGACY_NAMESPACE
        || namespace
            .strip_prefix(LEGACY_NAMESPACE)
            .is_some_and(|rest| rest.starts_with('.'));
    if legacy {
        BUILTIN_NAMESPACE
    } else {
        namespace
    }
}

/// Builds an installer from its record fields.
pub type Constructor = fn(Value) -> Result<Box<dyn Installer>>;

/// Deserialize fields into `T`.
pub fn construct<T>(fields: Value) -> Result<Box<dyn Installer>>
where
    T: Installer + DeserializeOwned,
{
    let installer: T = serde_yaml::from_value(fields)?;
    Ok(Box::new(installer))
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    constructors: HashMap<(String, String), Constructor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every builtin optional installer, plus the tags
    /// older config files used.
    pub fn builtin() -> Self {
        let mut registry = Registry::new();
        let builtin: [(&str, Constructor); 14] = [
            ("OpenSSLInstaller", construct::<OpenSSLInstaller>),
            ("ZlibInstaller", construct::<ZlibInstaller>),
            ("ZlibCFInstaller", construct::<ZlibInstaller>),
            ("BrotliInstaller", construct::<BrotliInstaller>),
            ("HeadersMoreInstaller", construct::<HeadersMoreInstaller>),
            ("FancyIndexInstaller", construct::<FancyIndexInstaller>),
            ("GeoIP2Installer", construct::<GeoIP2Installer>),
            ("DynamicTLSSizeInstaller", construct::<DynamicTLSSizeInstaller>),
            ("DynamicResizeTLSInstaller", construct::<DynamicTLSSizeInstaller>),
            ("GenericGitInstaller", construct::<GenericGitInstaller>),
            ("GeneralGitInstaller", construct::<GenericGitInstaller>),
            ("NginxDevKitInstaller", construct::<NginxDevKitInstaller>),
            ("SubFilterInstaller", construct::<SubFilterInstaller>),
            // The core lives in its own config section, never in the list.
            ("CoreInstaller", reject_core),
        ];
        for (tag, ctor) in builtin {
            registry.register(BUILTIN_NAMESPACE, tag, ctor);
        }
        registry
    }

    /// Register (or replace) the constructor for `(namespace, tag)`.
    pub fn register(&mut self, namespace: &str, tag: &str, ctor: Constructor) -> &mut Self {
        self.constructors
            .insert((namespace.to_string(), tag.to_string()), ctor);
        self
    }

    pub fn contains(&self, namespace: &str, tag: &str) -> bool {
        self.constructors
            .contains_key(&(namespace.to_string(), tag.to_string()))
    }

    /// Build an installer from a config record.
    pub fn from_record(&self, record: Value) -> Result<Box<dyn Installer>> {
        let Value::Mapping(mut map) = record else {
            return Err(InstallError::ConfigValidation(
                "installer record must be a mapping".to_string(),
            ));
        };

        let tag = match map.remove(CLASSNAME_KEY) {
            Some(Value::String(tag)) => tag,
            Some(_) => {
                return Err(InstallError::ConfigValidation(
                    "installer `classname` must be a string".to_string(),
                ))
            }
            None => {
                return Err(InstallError::ConfigValidation(
                    "installer record has no `classname`".to_string(),
                ))
            }
        };
        let namespace = match map.remove(MODULENAME_KEY) {
            Some(Value::String(ns)) => canonical_namespace(&ns).to_string(),
            None | Some(Value::Null) => BUILTIN_NAMESPACE.to_string(),
            Some(_) => {
                return Err(InstallError::ConfigValidation(
                    "installer `modulename` must be a string".to_string(),
                ))
            }
        };

        let ctor = self
            .constructors
            .get(&(namespace.clone(), tag.clone()))
            .ok_or(InstallError::UnknownInstallerType {
                namespace: namespace.clone(),
                tag: tag.clone(),
            })?;
        ctor(Value::Mapping(map)).map_err(|e| match e {
            InstallError::ConfigValidation(reason) => {
                InstallError::ConfigValidation(format!("{tag}: {reason}"))
            }
            other => other,
        })
    }
}

fn reject_core(_fields: Value) -> Result<Box<dyn Installer>> {
    Err(InstallError::ConfigValidation(
        "CoreInstaller belongs in the `core` section".to_string(),
    ))
}

/// Serialize an installer to its config record.
pub fn to_record(installer: &dyn Installer) -> Result<Value> {
    let mut record = Mapping::new();
    record.insert(
        Value::String(CLASSNAME_KEY.to_string()),
        Value::String(installer.tag().to_string()),
    );
    if installer.namespace() != BUILTIN_NAMESPACE {
        record.insert(
            Value::String(MODULENAME_KEY.to_string()),
            Value::String(installer.namespace().to_string()),
        );
    }
    for (key, value) in installer.fields()? {
        record.insert(key, value);
    }
    Ok(Value::Mapping(record))
}
