//! Early metadata decoder.
//!
//! Extracts the version-independent facts a module exposes before any
//! schema work happens: provider requirements and references, the core
//! version constraint, declared module calls, variables and outputs.
//! Decoding never fails; malformed declarations produce diagnostics and
//! are otherwise skipped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::{
  addr::{ModuleSourceAddr, ProviderAddr, ProviderRef},
  ast::{Block, Diagnostic, Expression, File, Span},
  version::VersionConstraints,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleMeta {
  pub core_requirements: Option<VersionConstraints>,
  pub provider_requirements: HashMap<ProviderAddr, VersionConstraints>,
  pub provider_references: HashMap<ProviderRef, ProviderAddr>,
  pub module_calls: HashMap<String, DeclaredModuleCall>,
  pub variables: BTreeMap<String, Variable>,
  pub outputs: BTreeMap<String, Output>,
}

/// A `module "name" { source = ... }` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredModuleCall {
  pub local_name: String,
  /// File the call is declared in.
  pub filename: String,
  pub source: ModuleSourceAddr,
  pub source_string: String,
  pub source_span: Span,
  pub version: Option<VersionConstraints>,
  pub name_span: Span,
  pub block_span: Span,
  /// Attribute names supplied in the call body (the call's inputs).
  pub input_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
  pub name: String,
  pub description: Option<String>,
  pub type_hint: Option<String>,
  /// A variable with no default must be supplied by the caller.
  pub is_required: bool,
  pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
  pub name: String,
  pub description: Option<String>,
  pub span: Span,
}

/// Decodes metadata from all parsed files of one module.
pub fn load_module(files: &BTreeMap<String, Arc<File>>) -> (ModuleMeta, Vec<(String, Diagnostic)>) {
  let mut meta = ModuleMeta::default();
  let mut diags = Vec::new();

  for (filename, file) in files {
    for block in &file.body.blocks {
      match block.block_type.name.as_str() {
        "terraform" | "tofu" => decode_core_block(&mut meta, block),
        "provider" => decode_provider_block(&mut meta, block),
        "resource" | "data" => decode_resource_block(&mut meta, block, filename, &mut diags),
        "module" => decode_module_block(&mut meta, block, filename, &mut diags),
        "variable" => decode_variable_block(&mut meta, block, filename, &mut diags),
        "output" => decode_output_block(&mut meta, block),
        _ => {}
      }
    }
  }

  (meta, diags)
}

fn constraint_from(expr: &Expression) -> Option<VersionConstraints> {
  expr.as_string().and_then(|s| s.parse().ok())
}

fn decode_core_block(meta: &mut ModuleMeta, block: &Block) {
  if let Some(attr) = block.body.attribute("required_version")
    && let Some(cons) = constraint_from(&attr.value)
  {
    meta.core_requirements = Some(cons);
  }

  for rp in block.body.blocks_of_type("required_providers") {
    for attr in &rp.body.attributes {
      let local_name = attr.key.name.clone();
      let (source, version) = match &attr.value {
        Expression::Object { entries, .. } => {
          let source = entries
            .iter()
            .find(|e| e.key == "source")
            .and_then(|e| e.value.as_string())
            .map(str::to_string);
          let version = entries
            .iter()
            .find(|e| e.key == "version")
            .and_then(|e| constraint_from(&e.value));
          (source, version)
        }
        // Legacy form: name = "version constraint"
        other => (None, other.as_string().and_then(|s| s.parse().ok())),
      };

      let addr = source
        .as_deref()
        .and_then(ProviderAddr::parse)
        .unwrap_or_else(|| ProviderAddr::implied_by_local_name(&local_name));

      meta
        .provider_requirements
        .entry(addr.clone())
        .or_insert_with(|| version.clone().unwrap_or_default());
      meta.provider_references.insert(
        ProviderRef {
          local_name,
          alias: None,
        },
        addr,
      );
    }
  }
}

fn decode_provider_block(meta: &mut ModuleMeta, block: &Block) {
  let Some(local_name) = block.label_value(0).map(str::to_string) else {
    return;
  };
  let alias = block
    .body
    .attribute("alias")
    .and_then(|a| a.value.as_string())
    .map(str::to_string);

  let addr = meta
    .provider_references
    .get(&ProviderRef {
      local_name: local_name.clone(),
      alias: None,
    })
    .cloned()
    .unwrap_or_else(|| ProviderAddr::implied_by_local_name(&local_name));

  if let Some(attr) = block.body.attribute("version")
    && let Some(cons) = constraint_from(&attr.value)
  {
    meta.provider_requirements.entry(addr.clone()).or_insert(cons);
  } else {
    meta.provider_requirements.entry(addr.clone()).or_default();
  }

  meta.provider_references.insert(ProviderRef { local_name, alias }, addr);
}

fn decode_resource_block(
  meta: &mut ModuleMeta,
  block: &Block,
  filename: &str,
  diags: &mut Vec<(String, Diagnostic)>,
) {
  let Some(type_name) = block.label_value(0) else {
    diags.push((
      filename.to_string(),
      Diagnostic::error(
        format!("{} block is missing a type label", block.block_type.name),
        block.block_type.span,
      ),
    ));
    return;
  };

  let local_name = type_name.split('_').next().unwrap_or(type_name).to_string();
  let provider_ref = ProviderRef {
    local_name: local_name.clone(),
    alias: None,
  };
  if !meta.provider_references.contains_key(&provider_ref) {
    let addr = ProviderAddr::implied_by_local_name(&local_name);
    meta.provider_requirements.entry(addr.clone()).or_default();
    meta.provider_references.insert(provider_ref, addr);
  }
}

fn decode_module_block(meta: &mut ModuleMeta, block: &Block, filename: &str, diags: &mut Vec<(String, Diagnostic)>) {
  let Some(local_name) = block.label_value(0).map(str::to_string) else {
    diags.push((
      filename.to_string(),
      Diagnostic::error("module block is missing a name label", block.block_type.span),
    ));
    return;
  };

  let Some(source_attr) = block.body.attribute("source") else {
    diags.push((
      filename.to_string(),
      Diagnostic::error(
        format!("module {local_name:?} is missing the required \"source\" attribute"),
        block.span,
      ),
    ));
    return;
  };
  let Some(source_string) = source_attr.value.as_string().map(str::to_string) else {
    diags.push((
      filename.to_string(),
      Diagnostic::error("module source must be a string literal", source_attr.value.span()),
    ));
    return;
  };

  let version = block.body.attribute("version").and_then(|a| constraint_from(&a.value));
  let input_names = block
    .body
    .attributes
    .iter()
    .map(|a| a.key.name.clone())
    .filter(|name| name != "source" && name != "version" && name != "providers")
    .collect();

  meta.module_calls.insert(
    local_name.clone(),
    DeclaredModuleCall {
      source: ModuleSourceAddr::parse(&source_string),
      source_span: source_attr.value.span(),
      source_string,
      version,
      name_span: block.labels[0].span(),
      block_span: block.span,
      input_names,
      filename: filename.to_string(),
      local_name,
    },
  );
}

fn decode_variable_block(meta: &mut ModuleMeta, block: &Block, filename: &str, diags: &mut Vec<(String, Diagnostic)>) {
  let Some(name) = block.label_value(0).map(str::to_string) else {
    diags.push((
      filename.to_string(),
      Diagnostic::error("variable block is missing a name label", block.block_type.span),
    ));
    return;
  };

  let description = block
    .body
    .attribute("description")
    .and_then(|a| a.value.as_string())
    .map(str::to_string);
  let type_hint = block.body.attribute("type").map(|a| match &a.value {
    Expression::Reference(r) => r.parts.join("."),
    Expression::Raw { text, .. } => text.clone(),
    other => other.as_string().unwrap_or("").to_string(),
  });
  let is_required = block.body.attribute("default").is_none();

  meta.variables.insert(
    name.clone(),
    Variable {
      name,
      description,
      type_hint,
      is_required,
      span: block.span,
    },
  );
}

fn decode_output_block(meta: &mut ModuleMeta, block: &Block) {
  let Some(name) = block.label_value(0).map(str::to_string) else {
    return;
  };
  let description = block
    .body
    .attribute("description")
    .and_then(|a| a.value.as_string())
    .map(str::to_string);
  meta.outputs.insert(
    name.clone(),
    Output {
      name,
      description,
      span: block.span,
    },
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse;

  fn meta_of(src: &str) -> (ModuleMeta, Vec<(String, Diagnostic)>) {
    let (file, diags) = parse(src);
    assert!(diags.is_empty(), "parse diags: {diags:?}");
    let mut files = BTreeMap::new();
    files.insert("main.tf".to_string(), Arc::new(file));
    load_module(&files)
  }

  #[test]
  fn decodes_required_providers() {
    let (meta, diags) = meta_of(
      r#"
terraform {
  required_version = ">= 1.0"
  required_providers {
    github = {
      source  = "integrations/github"
      version = "~> 5.0"
    }
  }
}
"#,
    );
    assert!(diags.is_empty());
    assert_eq!(meta.core_requirements.unwrap().to_string(), ">= 1.0.0");
    let addr = ProviderAddr::parse("integrations/github").unwrap();
    assert_eq!(meta.provider_requirements[&addr].to_string(), "~> 5.0.0");
    let re = ProviderRef {
      local_name: "github".into(),
      alias: None,
    };
    assert_eq!(meta.provider_references[&re], addr);
  }

  #[test]
  fn implied_provider_from_data_source() {
    let (meta, _) = meta_of("data \"terraform_remote_state\" \"vpc\" { }\n");
    let re = ProviderRef {
      local_name: "terraform".into(),
      alias: None,
    };
    assert_eq!(
      meta.provider_references[&re].to_string(),
      "registry.opentofu.org/builtin/terraform"
    );
  }

  #[test]
  fn decodes_module_calls() {
    let (meta, diags) = meta_of(
      r#"
module "refname" {
  source = "./submodule"
  testvar = "value"
}
"#,
    );
    assert!(diags.is_empty());
    let call = &meta.module_calls["refname"];
    assert_eq!(call.source, ModuleSourceAddr::Local("./submodule".into()));
    assert_eq!(call.input_names, vec!["testvar"]);
  }

  #[test]
  fn module_without_source_is_diagnosed() {
    let (meta, diags) = meta_of("module \"broken\" {\n}\n");
    assert!(meta.module_calls.is_empty());
    assert_eq!(diags.len(), 1);
    assert!(diags[0].1.message.contains("source"));
  }

  #[test]
  fn decodes_variables_and_outputs() {
    let (meta, _) = meta_of(
      r#"
variable "testvar" {
  description = "a test variable"
  type        = string
}

variable "with_default" {
  default = 1
}

output "id" {
  value = var.testvar
}
"#,
    );
    let testvar = &meta.variables["testvar"];
    assert!(testvar.is_required);
    assert_eq!(testvar.description.as_deref(), Some("a test variable"));
    assert_eq!(testvar.type_hint.as_deref(), Some("string"));
    assert!(!meta.variables["with_default"].is_required);
    assert!(meta.outputs.contains_key("id"));
  }
}
