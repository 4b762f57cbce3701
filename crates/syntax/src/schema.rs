//! Provider schema model and its JSON wire format.
//!
//! The wire format is the providers-schema JSON emitted by the CLI and
//! bundled (gzipped) with the server. Decoding converts it into the
//! resolved in-memory form the decoder consumes.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSchemasJson {
  #[serde(default)]
  pub format_version: String,
  #[serde(default)]
  pub provider_schemas: HashMap<String, ProviderSchemaJson>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSchemaJson {
  #[serde(default)]
  pub provider: Option<VersionedSchemaJson>,
  #[serde(default)]
  pub resource_schemas: HashMap<String, VersionedSchemaJson>,
  #[serde(default)]
  pub data_source_schemas: HashMap<String, VersionedSchemaJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionedSchemaJson {
  #[serde(default)]
  pub version: u64,
  pub block: SchemaBlockJson,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaBlockJson {
  #[serde(default)]
  pub attributes: HashMap<String, SchemaAttributeJson>,
  #[serde(default)]
  pub block_types: HashMap<String, NestedBlockJson>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub description_kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaAttributeJson {
  #[serde(rename = "type", default)]
  pub type_json: serde_json::Value,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub description_kind: Option<String>,
  #[serde(default)]
  pub required: bool,
  #[serde(default)]
  pub optional: bool,
  #[serde(default)]
  pub computed: bool,
  #[serde(default)]
  pub sensitive: bool,
  #[serde(default)]
  pub deprecated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedBlockJson {
  #[serde(default)]
  pub nesting_mode: String,
  pub block: SchemaBlockJson,
  #[serde(default)]
  pub min_items: u64,
  #[serde(default)]
  pub max_items: u64,
}

// ============================================================================
// Resolved schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderSchema {
  pub provider: Option<SchemaBlock>,
  pub resources: BTreeMap<String, SchemaBlock>,
  pub data_sources: BTreeMap<String, SchemaBlock>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaBlock {
  pub attributes: BTreeMap<String, SchemaAttribute>,
  pub blocks: BTreeMap<String, SchemaBlock>,
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaAttribute {
  pub type_hint: String,
  pub description: Option<String>,
  pub required: bool,
  pub optional: bool,
  pub computed: bool,
  pub deprecated: bool,
}

impl ProviderSchema {
  /// Decodes the providers-schema JSON document; the `address` selects one
  /// provider out of the (usually single-entry) document.
  pub fn from_json_bytes(bytes: &[u8], address: &str) -> Result<Self, serde_json::Error> {
    let doc: ProviderSchemasJson = serde_json::from_slice(bytes)?;
    let entry = doc.provider_schemas.get(address).cloned().unwrap_or_default();
    Ok(Self::from_wire(entry))
  }

  pub fn from_wire(json: ProviderSchemaJson) -> Self {
    ProviderSchema {
      provider: json.provider.map(|v| SchemaBlock::from_wire(v.block)),
      resources: json
        .resource_schemas
        .into_iter()
        .map(|(k, v)| (k, SchemaBlock::from_wire(v.block)))
        .collect(),
      data_sources: json
        .data_source_schemas
        .into_iter()
        .map(|(k, v)| (k, SchemaBlock::from_wire(v.block)))
        .collect(),
    }
  }
}

impl SchemaBlock {
  pub fn from_wire(json: SchemaBlockJson) -> Self {
    SchemaBlock {
      attributes: json
        .attributes
        .into_iter()
        .map(|(k, v)| (k, SchemaAttribute::from_wire(v)))
        .collect(),
      blocks: json
        .block_types
        .into_iter()
        .map(|(k, v)| (k, SchemaBlock::from_wire(v.block)))
        .collect(),
      description: json.description,
    }
  }

  pub fn required_attributes(&self) -> impl Iterator<Item = (&String, &SchemaAttribute)> {
    self.attributes.iter().filter(|(_, a)| a.required)
  }
}

impl SchemaAttribute {
  fn from_wire(json: SchemaAttributeJson) -> Self {
    SchemaAttribute {
      type_hint: type_hint(&json.type_json),
      description: json.description,
      required: json.required,
      optional: json.optional,
      computed: json.computed,
      deprecated: json.deprecated,
    }
  }
}

/// Renders the JSON type expression as a compact display string:
/// `"string"` stays `string`, `["list","string"]` becomes `list(string)`.
fn type_hint(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.clone(),
    serde_json::Value::Array(items) => {
      let parts: Vec<String> = items.iter().map(type_hint).collect();
      match parts.split_first() {
        Some((head, rest)) if !rest.is_empty() => format!("{head}({})", rest.join(", ")),
        Some((head, _)) => head.clone(),
        None => String::new(),
      }
    }
    serde_json::Value::Object(map) => {
      let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k} = {}", type_hint(v))).collect();
      format!("object({{ {} }})", parts.join(", "))
    }
    serde_json::Value::Null => String::new(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FIXTURE: &str = r#"{
    "format_version": "1.0",
    "provider_schemas": {
      "registry.opentofu.org/builtin/terraform": {
        "data_source_schemas": {
          "terraform_remote_state": {
            "version": 0,
            "block": {
              "attributes": {
                "backend": {
                  "type": "string",
                  "description": "The remote backend to use.",
                  "required": true
                },
                "outputs": {
                  "type": "dynamic",
                  "computed": true
                }
              }
            }
          }
        }
      }
    }
  }"#;

  #[test]
  fn decodes_provider_schema_document() {
    let schema = ProviderSchema::from_json_bytes(FIXTURE.as_bytes(), "registry.opentofu.org/builtin/terraform").unwrap();
    let remote_state = &schema.data_sources["terraform_remote_state"];
    let backend = &remote_state.attributes["backend"];
    assert!(backend.required);
    assert_eq!(backend.type_hint, "string");
    assert!(remote_state.attributes["outputs"].computed);
  }

  #[test]
  fn type_hints_render_compactly() {
    assert_eq!(type_hint(&serde_json::json!("string")), "string");
    assert_eq!(type_hint(&serde_json::json!(["list", "string"])), "list(string)");
    assert_eq!(
      type_hint(&serde_json::json!(["map", ["list", "string"]])),
      "map(list(string))"
    );
  }
}
