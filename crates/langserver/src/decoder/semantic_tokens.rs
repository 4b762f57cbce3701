//! Semantic tokens.
//!
//! The decoder emits abstract tokens; the server encodes them against the
//! legend negotiated with the client and drops types the client did not
//! advertise.

use tofuls_syntax::{Block, Body, Expression, File, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
  /// Block type keyword (`resource`, `module`, ...)
  Type,
  /// Block labels
  EnumMember,
  /// Attribute names
  Property,
  /// Dotted references
  Variable,
  String,
  Number,
  Keyword,
}

impl TokenType {
  pub fn as_lsp_name(self) -> &'static str {
    match self {
      TokenType::Type => "type",
      TokenType::EnumMember => "enumMember",
      TokenType::Property => "property",
      TokenType::Variable => "variable",
      TokenType::String => "string",
      TokenType::Number => "number",
      TokenType::Keyword => "keyword",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticToken {
  pub span: Span,
  pub token_type: TokenType,
}

/// Tokens in document order.
pub fn tokens_for_file(file: &File) -> Vec<SemanticToken> {
  let mut tokens = Vec::new();
  walk_body(&file.body, &mut tokens);
  tokens.sort_by_key(|t| (t.span.start.line, t.span.start.character));
  tokens
}

fn walk_body(body: &Body, out: &mut Vec<SemanticToken>) {
  for block in &body.blocks {
    walk_block(block, out);
  }
  for attr in &body.attributes {
    out.push(SemanticToken {
      span: attr.key.span,
      token_type: TokenType::Property,
    });
    walk_expression(&attr.value, out);
  }
}

fn walk_block(block: &Block, out: &mut Vec<SemanticToken>) {
  out.push(SemanticToken {
    span: block.block_type.span,
    token_type: TokenType::Type,
  });
  for label in &block.labels {
    out.push(SemanticToken {
      span: label.span(),
      token_type: TokenType::EnumMember,
    });
  }
  walk_body(&block.body, out);
}

fn walk_expression(expr: &Expression, out: &mut Vec<SemanticToken>) {
  match expr {
    Expression::String(s) => out.push(SemanticToken {
      span: s.span,
      token_type: TokenType::String,
    }),
    Expression::Number { span, .. } => out.push(SemanticToken {
      span: *span,
      token_type: TokenType::Number,
    }),
    Expression::Bool { span, .. } | Expression::Null { span } => out.push(SemanticToken {
      span: *span,
      token_type: TokenType::Keyword,
    }),
    Expression::Reference(r) => out.push(SemanticToken {
      span: r.span,
      token_type: TokenType::Variable,
    }),
    Expression::Array { items, .. } => {
      for item in items {
        walk_expression(item, out);
      }
    }
    Expression::Object { entries, .. } => {
      for entry in entries {
        out.push(SemanticToken {
          span: entry.key_span,
          token_type: TokenType::Property,
        });
        walk_expression(&entry.value, out);
      }
    }
    Expression::Raw { .. } => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tofuls_syntax::parse;

  #[test]
  fn tokens_cover_block_header_and_values() {
    let (file, _) = parse("resource \"aws_instance\" \"web\" {\n  ami = var.ami\n  count = 2\n}\n");
    let tokens = tokens_for_file(&file);
    let kinds: Vec<TokenType> = tokens.iter().map(|t| t.token_type).collect();
    assert_eq!(
      kinds,
      vec![
        TokenType::Type,
        TokenType::EnumMember,
        TokenType::EnumMember,
        TokenType::Property,
        TokenType::Variable,
        TokenType::Property,
        TokenType::Number,
      ]
    );
  }
}
