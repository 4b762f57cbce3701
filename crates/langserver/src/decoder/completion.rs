//! Completion.
//!
//! Candidates are derived from the block chain containing the cursor:
//! top level offers block types, a resource/data body offers schema
//! attributes and nested blocks, a module-call body offers the target
//! module's inputs, and an attribute-value position offers reference
//! targets. The result is sorted by label so identical queries against
//! an unchanged store yield an identical item list.

use tofuls_syntax::{Block, Body};

use super::{DocPosition, PathContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionItemKind {
  BlockType,
  Attribute,
  Reference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionItem {
  pub label: String,
  pub kind: CompletionItemKind,
  pub detail: Option<String>,
  pub documentation: Option<String>,
}

/// Core block types always offered at the top level.
const CORE_BLOCK_TYPES: &[(&str, &str)] = &[
  ("data", "Read from a data source"),
  ("locals", "Local value definitions"),
  ("module", "Call another module"),
  ("output", "Output value"),
  ("provider", "Provider configuration"),
  ("resource", "Managed resource"),
  ("terraform", "Core settings"),
  ("variable", "Input variable"),
];

/// Attributes of core block types, offered inside their bodies.
fn core_block_attributes(block_type: &str) -> &'static [(&'static str, &'static str)] {
  match block_type {
    "variable" => &[
      ("default", "Default value, making the variable optional"),
      ("description", "Documentation for the variable"),
      ("nullable", "Whether null is a valid value"),
      ("sensitive", "Hide values in output"),
      ("type", "Type constraint"),
    ],
    "output" => &[
      ("description", "Documentation for the output"),
      ("sensitive", "Hide values in output"),
      ("value", "The value to expose"),
    ],
    "terraform" => &[("required_version", "Core version constraint")],
    "provider" => &[("alias", "Alternate configuration name")],
    _ => &[],
  }
}

pub fn completion_at(ctx: &PathContext, filename: &str, pos: DocPosition) -> Vec<CompletionItem> {
  let Some(file) = ctx.record.parsed_files.get(filename) else {
    return Vec::new();
  };

  let chain = file.block_chain_at(pos.line, pos.character);
  let mut items = match chain.last() {
    None => top_level_items(),
    Some(innermost) => {
      if in_attribute_value(&innermost.body, pos) {
        reference_items(ctx)
      } else {
        block_body_items(ctx, &chain)
      }
    }
  };

  items.sort_by(|a, b| a.label.cmp(&b.label));
  items.dedup_by(|a, b| a.label == b.label);
  items
}

fn top_level_items() -> Vec<CompletionItem> {
  CORE_BLOCK_TYPES
    .iter()
    .map(|(label, doc)| CompletionItem {
      label: (*label).to_string(),
      kind: CompletionItemKind::BlockType,
      detail: Some("Block".to_string()),
      documentation: Some((*doc).to_string()),
    })
    .collect()
}

/// Whether the cursor sits inside the value of one of the body's
/// attributes, which switches completion to reference targets.
fn in_attribute_value(body: &Body, pos: DocPosition) -> bool {
  body
    .attributes
    .iter()
    .any(|attr| attr.value.span().contains(pos.line, pos.character))
}

fn block_body_items(ctx: &PathContext, chain: &[&Block]) -> Vec<CompletionItem> {
  let outer = chain[0];
  let innermost = chain[chain.len() - 1];
  let present: Vec<&str> = innermost.body.attributes.iter().map(|a| a.key.name.as_str()).collect();
  let mut items = Vec::new();

  match outer.block_type.name.as_str() {
    "module" if chain.len() == 1 => {
      if let Some(name) = outer.label_value(0)
        && let Some(call) = ctx.module_calls.get(name)
      {
        for input in &call.inputs {
          if present.contains(&input.name.as_str()) {
            continue;
          }
          items.push(CompletionItem {
            label: input.name.clone(),
            kind: CompletionItemKind::Attribute,
            detail: input.type_hint.clone().or_else(|| Some("input".to_string())),
            documentation: input.description.clone(),
          });
        }
      }
      for required in ["source", "version"] {
        if !present.contains(&required) {
          items.push(CompletionItem {
            label: required.to_string(),
            kind: CompletionItemKind::Attribute,
            detail: Some("string".to_string()),
            documentation: None,
          });
        }
      }
    }
    "resource" | "data" => {
      let is_data = outer.block_type.name == "data";
      if let Some(type_name) = outer.label_value(0)
        && let Some(schema) = ctx.schema_for_block_type(is_data, type_name)
        // When the cursor is in a nested block, offer that block's
        // schema attributes instead of the resource's
        && let Some(schema_block) = descend_schema(schema, &chain[1..])
      {
        for (name, attr) in &schema_block.attributes {
          if attr.computed && !attr.optional && !attr.required {
            continue;
          }
          if present.contains(&name.as_str()) {
            continue;
          }
          items.push(CompletionItem {
            label: name.clone(),
            kind: CompletionItemKind::Attribute,
            detail: Some(attr.type_hint.clone()),
            documentation: attr.description.clone(),
          });
        }
        for name in schema_block.blocks.keys() {
          items.push(CompletionItem {
            label: name.clone(),
            kind: CompletionItemKind::BlockType,
            detail: Some("Block".to_string()),
            documentation: None,
          });
        }
      }
    }
    other if chain.len() == 1 => {
      for (label, doc) in core_block_attributes(other) {
        if !present.contains(label) {
          items.push(CompletionItem {
            label: (*label).to_string(),
            kind: CompletionItemKind::Attribute,
            detail: None,
            documentation: Some((*doc).to_string()),
          });
        }
      }
      if other == "terraform" {
        items.push(CompletionItem {
          label: "required_providers".to_string(),
          kind: CompletionItemKind::BlockType,
          detail: Some("Block".to_string()),
          documentation: Some("Provider requirements".to_string()),
        });
      }
    }
    _ => {}
  }

  items
}

/// Follows the nested-block chain through the schema, returning the
/// schema block matching the innermost source block. `None` when the
/// nesting does not exist in the schema.
fn descend_schema<'a>(
  schema: &'a tofuls_syntax::schema::SchemaBlock,
  nested_chain: &[&Block],
) -> Option<&'a tofuls_syntax::schema::SchemaBlock> {
  let mut current = schema;
  for block in nested_chain {
    current = current.blocks.get(&block.block_type.name)?;
  }
  Some(current)
}

fn reference_items(ctx: &PathContext) -> Vec<CompletionItem> {
  ctx
    .record
    .ref_targets
    .iter()
    .filter(|t| t.addr.first().map(String::as_str) != Some("output"))
    .map(|target| CompletionItem {
      label: target.addr.join("."),
      kind: CompletionItemKind::Reference,
      detail: None,
      documentation: target.description.clone(),
    })
    .collect()
}
