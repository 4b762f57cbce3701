//! Schema and reference validation.
//!
//! Both run as pipeline jobs (gated on the enhanced-validation option)
//! and write their findings into the module record's diagnostics bags.

use std::collections::BTreeMap;

use tofuls_syntax::{Block, Diagnostic, File};

use super::PathContext;

/// Roots whose origins are resolvable from module-local targets. Other
/// roots (`path`, `each`, `count`, functions, provider-computed values)
/// are out of scope for reference validation.
const VALIDATED_ROOTS: &[&str] = &["var", "local", "module", "data"];

/// Schema-based validation of every parsed file.
pub fn validate_module(ctx: &PathContext) -> BTreeMap<String, Vec<Diagnostic>> {
  ctx
    .record
    .parsed_files
    .iter()
    .map(|(filename, file)| (filename.clone(), validate_file(ctx, file)))
    .collect()
}

/// Schema-based validation of one file.
pub fn validate_file(ctx: &PathContext, file: &File) -> Vec<Diagnostic> {
  let mut diags = Vec::new();
  for block in &file.body.blocks {
    validate_top_level_block(ctx, block, &mut diags);
  }
  diags
}

fn validate_top_level_block(ctx: &PathContext, block: &Block, diags: &mut Vec<Diagnostic>) {
  match block.block_type.name.as_str() {
    "resource" | "data" => validate_provider_block(ctx, block, diags),
    "module" => validate_module_call(ctx, block, diags),
    "variable" | "output" | "provider" => {
      if block.labels.is_empty() {
        diags.push(Diagnostic::error(
          format!("{} block requires a name label", block.block_type.name),
          block.block_type.span,
        ));
      }
    }
    "terraform" | "tofu" | "locals" | "moved" | "import" | "check" | "removed" => {}
    other => diags.push(Diagnostic::error(
      format!("unexpected block type {other:?}"),
      block.block_type.span,
    )),
  }
}

fn validate_provider_block(ctx: &PathContext, block: &Block, diags: &mut Vec<Diagnostic>) {
  let is_data = block.block_type.name == "data";
  if block.labels.len() < 2 {
    diags.push(Diagnostic::error(
      format!("{} block requires type and name labels", block.block_type.name),
      block.block_type.span,
    ));
    return;
  }
  let type_name = block.label_value(0).unwrap_or_default();

  let Some(schema) = ctx.schema_for_block_type(is_data, type_name) else {
    let kind = if is_data { "data source" } else { "resource type" };
    diags.push(Diagnostic::error(
      format!("unknown {kind} {type_name:?}"),
      block.labels[0].span(),
    ));
    return;
  };

  validate_against_schema(schema, block, diags);
}

fn validate_against_schema(schema: &tofuls_syntax::schema::SchemaBlock, block: &Block, diags: &mut Vec<Diagnostic>) {
  for attr in &block.body.attributes {
    match schema.attributes.get(&attr.key.name) {
      None => diags.push(Diagnostic::error(
        format!("unexpected attribute {:?}", attr.key.name),
        attr.key.span,
      )),
      Some(def) if def.computed && !def.optional && !def.required => diags.push(Diagnostic::error(
        format!("attribute {:?} is read-only", attr.key.name),
        attr.key.span,
      )),
      Some(_) => {}
    }
  }

  let present: Vec<&str> = block.body.attributes.iter().map(|a| a.key.name.as_str()).collect();
  for (name, _) in schema.required_attributes() {
    if !present.contains(&name.as_str()) {
      diags.push(Diagnostic::error(
        format!("required attribute {name:?} is missing"),
        block.block_type.span,
      ));
    }
  }

  for nested in &block.body.blocks {
    match schema.blocks.get(&nested.block_type.name) {
      Some(nested_schema) => validate_against_schema(nested_schema, nested, diags),
      None => diags.push(Diagnostic::error(
        format!("unexpected block {:?}", nested.block_type.name),
        nested.block_type.span,
      )),
    }
  }
}

fn validate_module_call(ctx: &PathContext, block: &Block, diags: &mut Vec<Diagnostic>) {
  let Some(name) = block.label_value(0) else {
    diags.push(Diagnostic::error(
      "module block requires a name label",
      block.block_type.span,
    ));
    return;
  };
  let Some(call) = ctx.module_calls.get(name) else {
    return;
  };
  // Inputs are only checkable once the call target is known
  if call.inputs.is_empty() {
    return;
  }

  let known: Vec<&str> = call.inputs.iter().map(|i| i.name.as_str()).collect();
  for attr in &block.body.attributes {
    let attr_name = attr.key.name.as_str();
    if matches!(attr_name, "source" | "version" | "providers" | "count" | "for_each" | "depends_on") {
      continue;
    }
    if !known.contains(&attr_name) {
      diags.push(Diagnostic::error(
        format!("module {name:?} does not declare an input {attr_name:?}"),
        attr.key.span,
      ));
    }
  }

  let present: Vec<&str> = block.body.attributes.iter().map(|a| a.key.name.as_str()).collect();
  for input in call.inputs.iter().filter(|i| i.required) {
    if !present.contains(&input.name.as_str()) {
      diags.push(Diagnostic::warning(
        format!("required input {:?} is not set", input.name),
        block.block_type.span,
      ));
    }
  }
}

/// Reference validation: flags origins with a resolvable root that match
/// no declared target.
pub fn unreferenced_origins(ctx: &PathContext) -> BTreeMap<String, Vec<Diagnostic>> {
  let mut by_file: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();

  let resource_types: Vec<&str> = ctx
    .record
    .ref_targets
    .iter()
    .filter(|t| !VALIDATED_ROOTS.contains(&t.addr[0].as_str()))
    .map(|t| t.addr[0].as_str())
    .collect();

  for origin in ctx.record.ref_origins.iter() {
    let root = origin.addr[0].as_str();
    let checkable = VALIDATED_ROOTS.contains(&root) || resource_types.contains(&root);
    if !checkable {
      continue;
    }
    let resolved = ctx.record.ref_targets.iter().any(|t| origin.matches(t));
    if !resolved {
      by_file.entry(origin.filename.clone()).or_default().push(Diagnostic::warning(
        format!("no declaration found for {:?}", origin.addr.join(".")),
        origin.span,
      ));
    }
  }

  by_file
}
