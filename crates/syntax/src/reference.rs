//! Reference targets and origins.
//!
//! A target is a declared entity a dotted expression could resolve to; an
//! origin is a dotted expression that uses one. Both carry source spans so
//! the decoder can answer definition, references and validation requests.

use crate::ast::{Block, Expression, File, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
  Variable,
  Local,
  ModuleCall,
  Resource,
  DataSource,
  Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTarget {
  /// Address steps, e.g. `["var", "region"]` or `["data", "aws_ami", "x"]`.
  pub addr: Vec<String>,
  pub kind: TargetKind,
  pub filename: String,
  /// Span of the whole declaration.
  pub span: Span,
  /// Span of the defining name label.
  pub name_span: Span,
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceOrigin {
  pub addr: Vec<String>,
  pub filename: String,
  pub span: Span,
}

impl ReferenceOrigin {
  /// An origin matches a target when the target address is a prefix of
  /// the origin address (`var.x` matches origin `var.x.y`).
  pub fn matches(&self, target: &ReferenceTarget) -> bool {
    self.addr.len() >= target.addr.len() && self.addr[..target.addr.len()] == target.addr[..]
  }
}

/// Collects the addressable targets declared in one file.
pub fn collect_targets(filename: &str, file: &File) -> Vec<ReferenceTarget> {
  let mut targets = Vec::new();
  for block in &file.body.blocks {
    let name_span = block.labels.first().map(|l| l.span()).unwrap_or(block.block_type.span);
    let description = block
      .body
      .attribute("description")
      .and_then(|a| a.value.as_string())
      .map(str::to_string);

    let target = |addr: Vec<String>, kind| ReferenceTarget {
      addr,
      kind,
      filename: filename.to_string(),
      span: block.span,
      name_span,
      description: description.clone(),
    };

    match block.block_type.name.as_str() {
      "variable" => {
        if let Some(name) = block.label_value(0) {
          targets.push(target(vec!["var".into(), name.into()], TargetKind::Variable));
        }
      }
      "module" => {
        if let Some(name) = block.label_value(0) {
          targets.push(target(vec!["module".into(), name.into()], TargetKind::ModuleCall));
        }
      }
      "output" => {
        if let Some(name) = block.label_value(0) {
          targets.push(target(vec!["output".into(), name.into()], TargetKind::Output));
        }
      }
      "data" => {
        if let (Some(type_name), Some(name)) = (block.label_value(0), block.label_value(1)) {
          targets.push(target(
            vec!["data".into(), type_name.into(), name.into()],
            TargetKind::DataSource,
          ));
        }
      }
      "resource" => {
        if let (Some(type_name), Some(name)) = (block.label_value(0), block.label_value(1)) {
          targets.push(target(vec![type_name.into(), name.into()], TargetKind::Resource));
        }
      }
      "locals" => {
        for attr in &block.body.attributes {
          targets.push(ReferenceTarget {
            addr: vec!["local".into(), attr.key.name.clone()],
            kind: TargetKind::Local,
            filename: filename.to_string(),
            span: attr.span,
            name_span: attr.key.span,
            description: None,
          });
        }
      }
      _ => {}
    }
  }
  targets
}

/// Collects every dotted reference used in expression position.
pub fn collect_origins(filename: &str, file: &File) -> Vec<ReferenceOrigin> {
  let mut origins = Vec::new();
  collect_body_origins(filename, &file.body, &mut origins);
  origins
}

fn collect_body_origins(filename: &str, body: &crate::ast::Body, out: &mut Vec<ReferenceOrigin>) {
  for attr in &body.attributes {
    collect_expr_origins(filename, &attr.value, out);
  }
  for block in &body.blocks {
    collect_block_origins(filename, block, out);
  }
}

fn collect_block_origins(filename: &str, block: &Block, out: &mut Vec<ReferenceOrigin>) {
  collect_body_origins(filename, &block.body, out);
}

fn collect_expr_origins(filename: &str, expr: &Expression, out: &mut Vec<ReferenceOrigin>) {
  match expr {
    Expression::Reference(r) => {
      // Single-name references (bare keywords like `string`) carry no
      // address to resolve
      if r.parts.len() >= 2 {
        out.push(ReferenceOrigin {
          addr: r.parts.clone(),
          filename: filename.to_string(),
          span: r.span,
        });
      }
    }
    Expression::Array { items, .. } => {
      for item in items {
        collect_expr_origins(filename, item, out);
      }
    }
    Expression::Object { entries, .. } => {
      for entry in entries {
        collect_expr_origins(filename, &entry.value, out);
      }
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse;

  #[test]
  fn collects_targets_across_kinds() {
    let src = r#"
variable "region" {}
resource "aws_instance" "web" {}
data "aws_ami" "base" {}
module "net" {
  source = "./net"
}
locals {
  name = "x"
}
"#;
    let (file, _) = parse(src);
    let targets = collect_targets("main.tf", &file);
    let addrs: Vec<String> = targets.iter().map(|t| t.addr.join(".")).collect();
    assert_eq!(
      addrs,
      vec!["var.region", "aws_instance.web", "data.aws_ami.base", "module.net", "local.name"]
    );
  }

  #[test]
  fn collects_origins_recursively() {
    let src = r#"
resource "aws_instance" "web" {
  ami   = data.aws_ami.base.id
  tags  = { Name = var.name }
  vpcs  = [module.net.vpc_id]
}
"#;
    let (file, _) = parse(src);
    let origins = collect_origins("main.tf", &file);
    let addrs: Vec<String> = origins.iter().map(|o| o.addr.join(".")).collect();
    assert_eq!(addrs, vec!["data.aws_ami.base.id", "var.name", "module.net.vpc_id"]);
  }

  #[test]
  fn origin_prefix_matching() {
    let (file, _) = parse("variable \"x\" {}\n");
    let target = &collect_targets("main.tf", &file)[0];
    let origin = ReferenceOrigin {
      addr: vec!["var".into(), "x".into(), "nested".into()],
      filename: "main.tf".into(),
      span: Span::default(),
    };
    assert!(origin.matches(target));
    let other = ReferenceOrigin {
      addr: vec!["var".into(), "y".into()],
      filename: "main.tf".into(),
      span: Span::default(),
    };
    assert!(!other.matches(target));
  }
}
