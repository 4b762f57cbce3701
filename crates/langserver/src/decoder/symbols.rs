//! Document and workspace symbols.

use tofuls_syntax::{Block, Body, File, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKindHint {
  Block,
  Attribute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
  pub name: String,
  pub kind: SymbolKindHint,
  pub span: Span,
  pub filename: String,
  pub children: Vec<Symbol>,
}

/// Hierarchical symbols for one file.
pub fn document_symbols(file: &File) -> Vec<Symbol> {
  body_symbols("", &file.body)
}

fn body_symbols(filename: &str, body: &Body) -> Vec<Symbol> {
  let mut out = Vec::new();
  for block in &body.blocks {
    out.push(block_symbol(filename, block));
  }
  for attr in &body.attributes {
    out.push(Symbol {
      name: attr.key.name.clone(),
      kind: SymbolKindHint::Attribute,
      span: attr.span,
      filename: filename.to_string(),
      children: Vec::new(),
    });
  }
  out.sort_by_key(|s| (s.span.start.line, s.span.start.character));
  out
}

fn block_symbol(filename: &str, block: &Block) -> Symbol {
  Symbol {
    name: block.symbol_name(),
    kind: SymbolKindHint::Block,
    span: block.span,
    filename: filename.to_string(),
    children: body_symbols(filename, &block.body),
  }
}

/// Flat top-level block symbols, used for workspace queries.
pub fn flat_symbols(filename: &str, file: &File) -> Vec<Symbol> {
  file
    .body
    .blocks
    .iter()
    .map(|block| Symbol {
      name: block.symbol_name(),
      kind: SymbolKindHint::Block,
      span: block.span,
      filename: filename.to_string(),
      children: Vec::new(),
    })
    .collect()
}

/// Case-insensitive substring match; the empty query matches everything.
pub fn query_matches(query: &str, name: &str) -> bool {
  if query.is_empty() {
    return true;
  }
  name.to_lowercase().contains(&query.to_lowercase())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tofuls_syntax::parse;

  #[test]
  fn block_symbols_carry_literal_ranges() {
    let (file, _) = parse("myblock \"custom\" {}");
    let symbols = flat_symbols("third.tf", &file);
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "myblock \"custom\"");
    assert_eq!(symbols[0].span.start.character, 0);
    assert_eq!(symbols[0].span.end.character, 19);
  }

  #[test]
  fn document_symbols_nest() {
    let (file, _) = parse("terraform {\n  required_providers {\n  }\n  required_version = \"1.0\"\n}\n");
    let symbols = document_symbols(&file);
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "terraform");
    let children: Vec<&str> = symbols[0].children.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(children, vec!["required_providers", "required_version"]);
  }

  #[test]
  fn query_matching() {
    assert!(query_matches("myb", "myblock \"custom\""));
    assert!(query_matches("", "anything"));
    assert!(!query_matches("myb", "provider \"github\""));
    assert!(query_matches("GITHUB", "provider \"github\""));
  }
}
