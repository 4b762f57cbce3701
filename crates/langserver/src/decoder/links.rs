//! Document links.
//!
//! Module calls with registry sources link to the public registry search
//! page over the source string literal.

use tofuls_syntax::{Span, addr::ModuleSourceAddr};

use super::PathContext;

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
  pub span: Span,
  pub target: String,
  pub tooltip: Option<String>,
}

pub fn document_links(ctx: &PathContext, filename: &str) -> Vec<Link> {
  let Some(file) = ctx.record.parsed_files.get(filename) else {
    return Vec::new();
  };

  let mut links = Vec::new();
  for block in file.body.blocks_of_type("module") {
    let Some(name) = block.label_value(0) else { continue };
    let Some(call) = ctx.record.meta.module_calls.get(name) else {
      continue;
    };
    if let ModuleSourceAddr::Registry(addr) = &call.source {
      links.push(Link {
        span: call.source_span,
        target: format!(
          "https://search.opentofu.org/module/{}/{}/{}/latest",
          addr.namespace, addr.name, addr.target_system
        ),
        tooltip: Some("Open module documentation".to_string()),
      });
    }
  }
  links.sort_by_key(|l| (l.span.start.line, l.span.start.character));
  links
}
