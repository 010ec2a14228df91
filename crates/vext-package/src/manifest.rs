//! `manifest.json` parsing and validation.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use vext_runtime::ScriptVersion;

use crate::{
    name::{parse_extension_name, ExtensionNameKind},
    PackageError,
};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
/// API version whose manifests carry an implied namespace and product.
pub const LEGACY_API_VERSION: u32 = 1;
pub const LEGACY_NAMESPACE: &str = "ExampleInc";
pub const LEGACY_COMPATIBLE_PRODUCT: &str = "p4d";
pub const KNOWN_API_VERSIONS: [u32; 2] = [LEGACY_API_VERSION, 20191];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeveloperInfo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Validated contents of an extension manifest.
pub struct ExtensionManifest {
    pub api_version: u32,
    pub manifest_version: i64,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub version_name: String,
    pub key: String,
    pub product: Option<String>,
    pub description: String,
    pub homepage_url: String,
    pub license: String,
    pub license_body: String,
    pub default_locale: String,
    pub supported_locales: Vec<String>,
    pub compatible_products: BTreeSet<String>,
    pub developer: DeveloperInfo,
    pub runtime: ScriptVersion,
}

impl ExtensionManifest {
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.namespace, self.name)
    }

    /// Rejects packages that do not list `host_product` or use an unknown API version.
    pub fn check_product_compatibility(&self, host_product: &str) -> Result<(), PackageError> {
        let host_product = host_product.trim().to_ascii_lowercase();
        if !self.compatible_products.contains(&host_product) {
            return Err(PackageError::IncompatibleProduct {
                product: host_product,
                supported: self
                    .compatible_products
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        if !KNOWN_API_VERSIONS.contains(&self.api_version) {
            return Err(PackageError::UnsupportedApiVersion(i64::from(
                self.api_version,
            )));
        }
        Ok(())
    }
}

pub fn parse_extension_manifest(raw: &str) -> Result<ExtensionManifest, PackageError> {
    let document = serde_json::from_str::<Value>(raw).map_err(|error| PackageError::ManifestParse {
        reason: error.to_string(),
    })?;
    let root = match document.as_object() {
        Some(root) if !root.is_empty() => root,
        _ => {
            return Err(PackageError::ManifestParse {
                reason: "not an object, or empty".to_string(),
            })
        }
    };

    let api_version = required_integer(root, None, "api_version")?;
    let api_version = u32::try_from(api_version)
        .map_err(|_| PackageError::UnsupportedApiVersion(api_version))?;
    let manifest_version = required_integer(root, None, "manifest_version")?;
    let default_locale = required_string(root, None, "default_locale")?;
    let description = required_string(root, None, "description")?;
    let homepage_url = required_string(root, None, "homepage_url")?;
    let key = required_string(root, None, "key")?;
    let license = required_string(root, None, "license")?;
    let license_body = required_string(root, None, "license_body")?;
    let name = required_string(root, None, "name")?;
    let namespace = if api_version == LEGACY_API_VERSION {
        LEGACY_NAMESPACE.to_string()
    } else {
        required_string(root, None, "namespace")?
    };
    let version = required_string(root, None, "version")?;
    let version_name = required_string(root, None, "version_name")?;
    let developer = required_object(root, "developer")?;
    let developer = DeveloperInfo {
        name: required_string(developer, Some("developer"), "name")?,
        url: required_string(developer, Some("developer"), "url")?,
    };
    let script_runtime = required_object(root, "script_runtime")?;
    let runtime_language = required_string(script_runtime, Some("script_runtime"), "language")?;
    let runtime_version = required_string(script_runtime, Some("script_runtime"), "version")?;
    let supported_locales = required_string_list(root, "supported_locales")?;
    let declared_products = required_string_list(root, "compatible_products")?;
    let compatible_products = if api_version == LEGACY_API_VERSION {
        BTreeSet::from([LEGACY_COMPATIBLE_PRODUCT.to_string()])
    } else {
        declared_products
            .iter()
            .map(|product| product.to_ascii_lowercase())
            .collect()
    };
    let product = match root.get("product") {
        None | Some(Value::Null) => None,
        Some(Value::String(product)) => Some(product.to_ascii_lowercase()),
        Some(_) => {
            return Err(PackageError::ManifestParse {
                reason: "'product' must be a string".to_string(),
            })
        }
    };

    let namespace = parse_extension_name(&namespace, ExtensionNameKind::Prefix)?;
    Uuid::parse_str(&key).map_err(|error| PackageError::InvalidKey {
        key: key.clone(),
        reason: error.to_string(),
    })?;
    let runtime = ScriptVersion::from_manifest(&runtime_language, &runtime_version).ok_or_else(
        || PackageError::UnsupportedRuntime {
            language: runtime_language.clone(),
            version: runtime_version.clone(),
        },
    )?;
    parse_extension_name(&name, ExtensionNameKind::Name)?;

    Ok(ExtensionManifest {
        api_version,
        manifest_version,
        namespace,
        name,
        version,
        version_name,
        key,
        product,
        description,
        homepage_url,
        license,
        license_body,
        default_locale,
        supported_locales,
        compatible_products,
        developer,
        runtime,
    })
}

fn dotted(parent: Option<&str>, key: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}.{key}"),
        None => key.to_string(),
    }
}

/// Single lookup point for required keys so every miss names the key.
fn required<'a>(
    object: &'a Map<String, Value>,
    parent: Option<&str>,
    key: &str,
) -> Result<&'a Value, PackageError> {
    object
        .get(key)
        .ok_or_else(|| PackageError::ManifestKeyNotFound {
            key: dotted(parent, key),
        })
}

fn type_mismatch(parent: Option<&str>, key: &str, expected: &str) -> PackageError {
    PackageError::ManifestParse {
        reason: format!("'{}' must be {expected}", dotted(parent, key)),
    }
}

fn required_string(
    object: &Map<String, Value>,
    parent: Option<&str>,
    key: &str,
) -> Result<String, PackageError> {
    required(object, parent, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| type_mismatch(parent, key, "a string"))
}

fn required_integer(
    object: &Map<String, Value>,
    parent: Option<&str>,
    key: &str,
) -> Result<i64, PackageError> {
    required(object, parent, key)?
        .as_i64()
        .ok_or_else(|| type_mismatch(parent, key, "an integer"))
}

fn required_object<'a>(
    object: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>, PackageError> {
    required(object, None, key)?
        .as_object()
        .ok_or_else(|| type_mismatch(None, key, "an object"))
}

fn required_string_list(object: &Map<String, Value>, key: &str) -> Result<Vec<String>, PackageError> {
    let values = required(object, None, key)?
        .as_array()
        .ok_or_else(|| type_mismatch(None, key, "a list of strings"))?;
    values
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| type_mismatch(None, key, "a list of strings"))
        })
        .collect()
}
