//! Recursive-descent parser producing a [`File`] plus recoverable
//! diagnostics. Errors never abort the parse; the parser records a
//! diagnostic and resynchronises on the next newline or closing brace so
//! later definitions still land in the tree.

use crate::{
  ast::{
    Attribute, Block, BlockLabel, Body, Diagnostic, Expression, File, Ident, ObjectEntry, Pos, Reference, Span,
    StringLit,
  },
  lexer::{Token, TokenKind, tokenize},
};

pub fn parse(src: &str) -> (File, Vec<Diagnostic>) {
  let tokens = tokenize(src);
  let mut parser = Parser {
    tokens,
    index: 0,
    diagnostics: Vec::new(),
  };
  let body = parser.parse_body(true);
  (File { body }, parser.diagnostics)
}

struct Parser {
  tokens: Vec<Token>,
  index: usize,
  diagnostics: Vec<Diagnostic>,
}

impl Parser {
  fn peek(&self) -> &Token {
    &self.tokens[self.index.min(self.tokens.len() - 1)]
  }

  fn peek_kind(&self) -> &TokenKind {
    &self.peek().kind
  }

  fn bump(&mut self) -> Token {
    let token = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
    if self.index < self.tokens.len() - 1 {
      self.index += 1;
    }
    token
  }

  fn at_eof(&self) -> bool {
    matches!(self.peek_kind(), TokenKind::Eof)
  }

  fn skip_newlines(&mut self) {
    while matches!(self.peek_kind(), TokenKind::Newline) {
      self.bump();
    }
  }

  fn error(&mut self, message: impl Into<String>, span: Span) {
    self.diagnostics.push(Diagnostic::error(message, span));
  }

  /// Skip to the next newline or closing brace without consuming it.
  fn recover(&mut self) {
    loop {
      match self.peek_kind() {
        TokenKind::Newline | TokenKind::RBrace | TokenKind::Eof => break,
        _ => {
          self.bump();
        }
      }
    }
  }

  fn parse_body(&mut self, top_level: bool) -> Body {
    let start = self.peek().span.start;
    let mut body = Body::default();

    loop {
      self.skip_newlines();
      match self.peek_kind().clone() {
        TokenKind::Eof => break,
        TokenKind::RBrace if !top_level => break,
        TokenKind::RBrace => {
          let span = self.bump().span;
          self.error("unexpected closing brace", span);
        }
        TokenKind::Ident(name) => {
          let ident_token = self.bump();
          let ident = Ident {
            name,
            span: ident_token.span,
          };
          match self.peek_kind() {
            TokenKind::Eq => {
              self.bump();
              if let Some(attr) = self.parse_attribute(ident) {
                body.attributes.push(attr);
              }
            }
            TokenKind::String(_) | TokenKind::Ident(_) | TokenKind::LBrace => {
              if let Some(block) = self.parse_block(ident) {
                body.blocks.push(block);
              }
            }
            _ => {
              let span = self.peek().span;
              self.error(
                format!("expected '=' or block definition after {:?}", ident.name),
                span,
              );
              self.recover();
            }
          }
        }
        _ => {
          let token = self.bump();
          self.error(format!("unexpected token {:?}", token.kind), token.span);
          self.recover();
        }
      }
    }

    let end = self.previous_end(start);
    body.span = Span::new(start, end);
    body
  }

  fn previous_end(&self, fallback: Pos) -> Pos {
    if self.index == 0 {
      return fallback;
    }
    self.tokens[self.index - 1].span.end
  }

  fn parse_attribute(&mut self, key: Ident) -> Option<Attribute> {
    let value = self.parse_expression()?;
    // An attribute runs to end of line
    match self.peek_kind() {
      TokenKind::Newline | TokenKind::Eof | TokenKind::RBrace => {}
      _ => {
        let span = self.peek().span;
        self.error("expected newline after attribute value", span);
        self.recover();
      }
    }
    let span = Span::new(key.span.start, value.span().end);
    Some(Attribute { key, value, span })
  }

  fn parse_block(&mut self, block_type: Ident) -> Option<Block> {
    let mut labels = Vec::new();
    loop {
      match self.peek_kind().clone() {
        TokenKind::String(value) => {
          let token = self.bump();
          labels.push(BlockLabel::String(StringLit {
            value,
            span: token.span,
          }));
        }
        TokenKind::Ident(name) => {
          let token = self.bump();
          labels.push(BlockLabel::Ident(Ident { name, span: token.span }));
        }
        TokenKind::LBrace => break,
        _ => {
          let span = self.peek().span;
          self.error("expected block label or '{'", span);
          self.recover();
          return None;
        }
      }
    }
    self.bump(); // consume '{'

    let body = self.parse_body(false);

    let end = match self.peek_kind() {
      TokenKind::RBrace => self.bump().span.end,
      _ => {
        let span = Span::new(block_type.span.start, self.peek().span.end);
        self.error(format!("unclosed block {:?}", block_type.name), span);
        self.previous_end(block_type.span.end)
      }
    };

    Some(Block {
      span: Span::new(block_type.span.start, end),
      block_type,
      labels,
      body,
    })
  }

  fn parse_expression(&mut self) -> Option<Expression> {
    match self.peek_kind().clone() {
      TokenKind::String(value) => {
        let token = self.bump();
        Some(Expression::String(StringLit {
          value,
          span: token.span,
        }))
      }
      TokenKind::Number(value) => {
        let token = self.bump();
        Some(Expression::Number {
          value,
          span: token.span,
        })
      }
      TokenKind::Ident(name) => match name.as_str() {
        "true" | "false" => {
          let token = self.bump();
          Some(Expression::Bool {
            value: name == "true",
            span: token.span,
          })
        }
        "null" => {
          let token = self.bump();
          Some(Expression::Null { span: token.span })
        }
        _ => self.parse_reference_or_raw(),
      },
      TokenKind::LBracket => self.parse_array(),
      TokenKind::LBrace => self.parse_object(),
      _ => {
        let token = self.bump();
        self.error(format!("expected expression, found {:?}", token.kind), token.span);
        self.recover();
        None
      }
    }
  }

  fn parse_reference_or_raw(&mut self) -> Option<Expression> {
    let first = self.bump();
    let TokenKind::Ident(first_name) = first.kind else {
      return None;
    };
    let start = first.span.start;
    let mut end = first.span.end;
    let mut parts = vec![first_name];

    loop {
      match self.peek_kind() {
        TokenKind::Dot => {
          self.bump();
          match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
              let token = self.bump();
              end = token.span.end;
              parts.push(name);
            }
            TokenKind::Number(n) => {
              // index access via legacy attribute syntax, e.g. list.0
              let token = self.bump();
              end = token.span.end;
              parts.push(format!("{n}"));
            }
            _ => {
              let span = self.peek().span;
              self.error("expected attribute name after '.'", span);
              break;
            }
          }
        }
        TokenKind::LBracket => {
          // consume a balanced index expression without recording it
          self.bump();
          let mut depth = 1usize;
          while depth > 0 && !self.at_eof() {
            match self.bump().kind {
              TokenKind::LBracket => depth += 1,
              TokenKind::RBracket => depth -= 1,
              _ => {}
            }
          }
          end = self.previous_end(end);
        }
        TokenKind::LParen => {
          // function call; swallow the arguments and fall back to raw
          let call_start = start;
          self.bump();
          let mut depth = 1usize;
          while depth > 0 && !self.at_eof() {
            match self.bump().kind {
              TokenKind::LParen => depth += 1,
              TokenKind::RParen => depth -= 1,
              _ => {}
            }
          }
          let span = Span::new(call_start, self.previous_end(end));
          return Some(Expression::Raw {
            text: format!("{}(...)", parts.join(".")),
            span,
          });
        }
        _ => break,
      }
    }

    Some(Expression::Reference(Reference {
      parts,
      span: Span::new(start, end),
    }))
  }

  fn parse_array(&mut self) -> Option<Expression> {
    let open = self.bump(); // '['
    let mut items = Vec::new();
    loop {
      while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Comma) {
        self.bump();
      }
      if matches!(self.peek_kind(), TokenKind::RBracket) {
        let close = self.bump();
        return Some(Expression::Array {
          items,
          span: Span::new(open.span.start, close.span.end),
        });
      }
      if self.at_eof() {
        self.error("unclosed array", open.span);
        return Some(Expression::Array {
          items,
          span: Span::new(open.span.start, self.previous_end(open.span.end)),
        });
      }
      match self.parse_expression() {
        Some(item) => items.push(item),
        None => break,
      }
    }
    Some(Expression::Array {
      items,
      span: Span::new(open.span.start, self.previous_end(open.span.end)),
    })
  }

  fn parse_object(&mut self) -> Option<Expression> {
    let open = self.bump(); // '{'
    let mut entries = Vec::new();
    loop {
      while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Comma) {
        self.bump();
      }
      match self.peek_kind().clone() {
        TokenKind::RBrace => {
          let close = self.bump();
          return Some(Expression::Object {
            entries,
            span: Span::new(open.span.start, close.span.end),
          });
        }
        TokenKind::Eof => {
          self.error("unclosed object", open.span);
          return Some(Expression::Object {
            entries,
            span: Span::new(open.span.start, self.previous_end(open.span.end)),
          });
        }
        TokenKind::Ident(key) | TokenKind::String(key) => {
          let key_token = self.bump();
          if matches!(self.peek_kind(), TokenKind::Eq | TokenKind::Colon) {
            self.bump();
          } else {
            self.error("expected '=' or ':' in object entry", key_token.span);
          }
          let Some(value) = self.parse_expression() else { break };
          entries.push(ObjectEntry {
            key,
            key_span: key_token.span,
            value,
          });
        }
        _ => {
          let token = self.bump();
          self.error(format!("unexpected token {:?} in object", token.kind), token.span);
        }
      }
    }
    Some(Expression::Object {
      entries,
      span: Span::new(open.span.start, self.previous_end(open.span.end)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_block_with_labels_and_exact_span() {
    let (file, diags) = parse("provider \"github\" {}");
    assert!(diags.is_empty());
    assert_eq!(file.body.blocks.len(), 1);
    let block = &file.body.blocks[0];
    assert_eq!(block.block_type.name, "provider");
    assert_eq!(block.label_value(0), Some("github"));
    assert_eq!(block.span.start.character, 0);
    assert_eq!(block.span.end.character, 20);
    assert_eq!(block.symbol_name(), "provider \"github\"");
  }

  #[test]
  fn parses_nested_blocks_and_attributes() {
    let src = r#"
terraform {
  required_version = ">= 1.0"
  required_providers {
    github = {
      source  = "integrations/github"
      version = "~> 5.0"
    }
  }
}
"#;
    let (file, diags) = parse(src);
    assert!(diags.is_empty(), "diags: {diags:?}");
    let tf = &file.body.blocks[0];
    assert_eq!(tf.block_type.name, "terraform");
    assert_eq!(tf.body.attribute("required_version").unwrap().value.as_string(), Some(">= 1.0"));
    let rp = &tf.body.blocks[0];
    assert_eq!(rp.block_type.name, "required_providers");
    let github = rp.body.attribute("github").unwrap();
    let Expression::Object { entries, .. } = &github.value else {
      panic!("expected object");
    };
    assert_eq!(entries[0].key, "source");
    assert_eq!(entries[0].value.as_string(), Some("integrations/github"));
  }

  #[test]
  fn parses_references() {
    let (file, diags) = parse("value = module.net.cidr\nother = var.region\n");
    assert!(diags.is_empty());
    let Expression::Reference(r) = &file.body.attributes[0].value else {
      panic!("expected reference");
    };
    assert_eq!(r.parts, vec!["module", "net", "cidr"]);
  }

  #[test]
  fn recovers_from_errors() {
    let (file, diags) = parse("bad ! token\nvariable \"ok\" {}\n");
    assert!(!diags.is_empty());
    assert_eq!(file.body.blocks.len(), 1);
    assert_eq!(file.body.blocks[0].symbol_name(), "variable \"ok\"");
  }

  #[test]
  fn unclosed_block_reported() {
    let (file, diags) = parse("resource \"a\" \"b\" {\n  x = 1\n");
    assert_eq!(file.body.blocks.len(), 1);
    assert!(diags.iter().any(|d| d.message.contains("unclosed block")));
  }

  #[test]
  fn parse_is_deterministic() {
    let src = "module \"net\" {\n  source = \"./net\"\n  cidr   = var.cidr\n}\n";
    let (a, _) = parse(src);
    let (b, _) = parse(src);
    assert_eq!(a, b);
  }

  #[test]
  fn data_block_parses() {
    let (file, diags) = parse("data \"terraform_remote_state\" \"vpc\" { }\n");
    assert!(diags.is_empty());
    let block = &file.body.blocks[0];
    assert_eq!(block.block_type.name, "data");
    assert_eq!(block.label_value(0), Some("terraform_remote_state"));
    assert_eq!(block.label_value(1), Some("vpc"));
  }
}
