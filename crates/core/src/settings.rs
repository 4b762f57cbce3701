//! Server settings decoded from LSP initialization options.
//!
//! Unknown keys are collected rather than rejected so the server can warn
//! the client instead of failing the handshake. Deprecated legacy keys are
//! accepted as no-ops for the same reason.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
  #[error("failed to decode initialization options: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("unable to expand path {path:?}: home directory unknown")]
  HomeDirUnknown { path: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationOptions {
  pub enable_enhanced_validation: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexingOptions {
  pub ignore_paths: Vec<String>,
  pub ignore_directory_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
  pub command_prefix: String,
  pub experimental_features: HashMap<String, serde_json::Value>,
  pub validation: ValidationOptions,
  pub indexing: IndexingOptions,
  pub ignore_single_file_warning: bool,

  // Deprecated keys, accepted so old clients keep working; each one
  // produces a warning notification and is otherwise ignored.
  #[serde(rename = "rootModulePaths")]
  pub legacy_root_module_paths: Vec<String>,
  #[serde(rename = "excludeModulePaths")]
  pub legacy_exclude_module_paths: Vec<String>,
  #[serde(rename = "ignoreDirectoryNames")]
  pub legacy_ignore_directory_names: Vec<String>,
}

/// Options plus the keys the decoder did not recognise.
#[derive(Debug, Clone, Default)]
pub struct DecodedOptions {
  pub options: Options,
  pub unused_keys: Vec<String>,
}

const KNOWN_KEYS: &[&str] = &[
  "commandPrefix",
  "experimentalFeatures",
  "validation",
  "indexing",
  "ignoreSingleFileWarning",
  "rootModulePaths",
  "excludeModulePaths",
  "ignoreDirectoryNames",
];

const KNOWN_VALIDATION_KEYS: &[&str] = &["enableEnhancedValidation"];
const KNOWN_INDEXING_KEYS: &[&str] = &["ignorePaths", "ignoreDirectoryNames"];

/// Decodes initialization options, collecting unrecognised keys.
pub fn decode_options(raw: Option<serde_json::Value>) -> Result<DecodedOptions, SettingsError> {
  let Some(raw) = raw else {
    return Ok(DecodedOptions::default());
  };
  if raw.is_null() {
    return Ok(DecodedOptions::default());
  }

  let mut unused_keys = Vec::new();
  if let serde_json::Value::Object(map) = &raw {
    for key in map.keys() {
      if !KNOWN_KEYS.contains(&key.as_str()) {
        unused_keys.push(key.clone());
      }
    }
    if let Some(serde_json::Value::Object(nested)) = map.get("validation") {
      for key in nested.keys() {
        if !KNOWN_VALIDATION_KEYS.contains(&key.as_str()) {
          unused_keys.push(format!("validation.{key}"));
        }
      }
    }
    if let Some(serde_json::Value::Object(nested)) = map.get("indexing") {
      for key in nested.keys() {
        if !KNOWN_INDEXING_KEYS.contains(&key.as_str()) {
          unused_keys.push(format!("indexing.{key}"));
        }
      }
    }
  }

  let options: Options = serde_json::from_value(raw)?;
  Ok(DecodedOptions { options, unused_keys })
}

/// Expands a leading `~` and resolves a relative path against `root`.
pub fn resolve_path(root: &Path, raw: &str) -> Result<PathBuf, SettingsError> {
  let expanded = if let Some(rest) = raw.strip_prefix("~") {
    let home = dirs::home_dir().ok_or_else(|| SettingsError::HomeDirUnknown { path: raw.to_string() })?;
    home.join(rest.trim_start_matches(['/', '\\']))
  } else {
    PathBuf::from(raw)
  };

  let absolute = if expanded.is_absolute() {
    expanded
  } else {
    root.join(expanded)
  };
  Ok(crate::path::normalize_path(absolute))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn decodes_recognised_options() {
    let decoded = decode_options(Some(json!({
      "commandPrefix": "1",
      "validation": { "enableEnhancedValidation": true },
      "indexing": {
        "ignorePaths": ["/abs/path"],
        "ignoreDirectoryNames": [".git"]
      },
      "ignoreSingleFileWarning": true
    })))
    .unwrap();

    assert!(decoded.unused_keys.is_empty());
    assert_eq!(decoded.options.command_prefix, "1");
    assert!(decoded.options.validation.enable_enhanced_validation);
    assert_eq!(decoded.options.indexing.ignore_paths, vec!["/abs/path"]);
    assert!(decoded.options.ignore_single_file_warning);
  }

  #[test]
  fn collects_unknown_keys() {
    let decoded = decode_options(Some(json!({
      "commandPrefix": "",
      "notAThing": 1,
      "validation": { "enableEnhancedValidation": false, "bogus": true }
    })))
    .unwrap();
    assert_eq!(decoded.unused_keys, vec!["notAThing".to_string(), "validation.bogus".to_string()]);
  }

  #[test]
  fn missing_options_default() {
    let decoded = decode_options(None).unwrap();
    assert!(!decoded.options.validation.enable_enhanced_validation);
    assert!(decoded.options.command_prefix.is_empty());
  }

  #[test]
  fn resolve_relative_against_root() {
    let resolved = resolve_path(Path::new("/work/root"), "modules/vendored").unwrap();
    assert_eq!(resolved, PathBuf::from("/work/root/modules/vendored"));
  }
}
