//! Lexer for the configuration language.
//!
//! Produces position-tracked tokens; newlines are significant (they
//! terminate attribute definitions) and are surfaced as tokens rather
//! than skipped. Comments (`#`, `//`, `/* */`) are dropped.

use crate::ast::{Pos, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
  Ident(String),
  String(String),
  Number(f64),
  LBrace,
  RBrace,
  LBracket,
  RBracket,
  LParen,
  RParen,
  Eq,
  Comma,
  Dot,
  Colon,
  Newline,
  /// A character the grammar has no use for; carried for error reporting.
  Unexpected(char),
  Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  pub span: Span,
}

pub fn tokenize(src: &str) -> Vec<Token> {
  Lexer::new(src).run()
}

struct Lexer<'a> {
  src: &'a str,
  chars: std::iter::Peekable<std::str::CharIndices<'a>>,
  pos: Pos,
  tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
  fn new(src: &'a str) -> Self {
    Self {
      src,
      chars: src.char_indices().peekable(),
      pos: Pos::default(),
      tokens: Vec::new(),
    }
  }

  fn bump(&mut self) -> Option<char> {
    let (i, c) = self.chars.next()?;
    self.pos.byte = i + c.len_utf8();
    if c == '\n' {
      self.pos.line += 1;
      self.pos.character = 0;
    } else {
      self.pos.character += c.len_utf16() as u32;
    }
    Some(c)
  }

  fn peek(&mut self) -> Option<char> {
    self.chars.peek().map(|(_, c)| *c)
  }

  fn push(&mut self, kind: TokenKind, start: Pos) {
    self.tokens.push(Token {
      kind,
      span: Span::new(start, self.pos),
    });
  }

  fn run(mut self) -> Vec<Token> {
    while let Some(c) = self.peek() {
      let start = self.pos;
      match c {
        '\n' => {
          self.bump();
          self.push(TokenKind::Newline, start);
        }
        c if c.is_whitespace() => {
          self.bump();
        }
        '#' => self.skip_line_comment(),
        '/' => {
          self.bump();
          match self.peek() {
            Some('/') => self.skip_line_comment(),
            Some('*') => self.skip_block_comment(),
            _ => self.push(TokenKind::Unexpected('/'), start),
          }
        }
        '"' => self.lex_string(start),
        c if c.is_ascii_digit() => self.lex_number(start),
        c if is_ident_start(c) => self.lex_ident(start),
        '{' => self.single(TokenKind::LBrace, start),
        '}' => self.single(TokenKind::RBrace, start),
        '[' => self.single(TokenKind::LBracket, start),
        ']' => self.single(TokenKind::RBracket, start),
        '(' => self.single(TokenKind::LParen, start),
        ')' => self.single(TokenKind::RParen, start),
        '=' => self.single(TokenKind::Eq, start),
        ',' => self.single(TokenKind::Comma, start),
        '.' => self.single(TokenKind::Dot, start),
        ':' => self.single(TokenKind::Colon, start),
        '-' => {
          // Negative number literal; standalone '-' is unexpected
          self.bump();
          if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.lex_number_from(start, true);
          } else {
            self.push(TokenKind::Unexpected('-'), start);
          }
        }
        other => {
          self.bump();
          self.push(TokenKind::Unexpected(other), start);
        }
      }
    }
    let end = self.pos;
    self.tokens.push(Token {
      kind: TokenKind::Eof,
      span: Span::new(end, end),
    });
    self.tokens
  }

  fn single(&mut self, kind: TokenKind, start: Pos) {
    self.bump();
    self.push(kind, start);
  }

  fn skip_line_comment(&mut self) {
    while let Some(c) = self.peek() {
      if c == '\n' {
        break;
      }
      self.bump();
    }
  }

  fn skip_block_comment(&mut self) {
    self.bump(); // consume '*'
    let mut prev = '\0';
    while let Some(c) = self.bump() {
      if prev == '*' && c == '/' {
        break;
      }
      prev = c;
    }
  }

  fn lex_string(&mut self, start: Pos) {
    self.bump(); // opening quote
    let mut value = String::new();
    loop {
      match self.peek() {
        None | Some('\n') => break, // unterminated; parser reports on use
        Some('"') => {
          self.bump();
          break;
        }
        Some('\\') => {
          self.bump();
          match self.bump() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('"') => value.push('"'),
            Some('\\') => value.push('\\'),
            Some(other) => {
              value.push('\\');
              value.push(other);
            }
            None => break,
          }
        }
        Some(c) => {
          value.push(c);
          self.bump();
        }
      }
    }
    self.push(TokenKind::String(value), start);
  }

  fn lex_number(&mut self, start: Pos) {
    self.lex_number_from(start, false);
  }

  fn lex_number_from(&mut self, start: Pos, negative: bool) {
    let begin = self.pos.byte;
    while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
      // A trailing '.' not followed by a digit belongs to a traversal
      if self.peek() == Some('.') {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        if !lookahead.peek().is_some_and(|(_, c)| c.is_ascii_digit()) {
          break;
        }
      }
      self.bump();
    }
    let raw = &self.src[begin..self.pos.byte];
    let mut value: f64 = raw.parse().unwrap_or(0.0);
    if negative {
      value = -value;
    }
    self.push(TokenKind::Number(value), start);
  }

  fn lex_ident(&mut self, start: Pos) {
    let begin = self.pos.byte;
    while self.peek().is_some_and(is_ident_continue) {
      self.bump();
    }
    let name = self.src[begin..self.pos.byte].to_string();
    self.push(TokenKind::Ident(name), start);
  }
}

fn is_ident_start(c: char) -> bool {
  c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
  c.is_alphanumeric() || c == '_' || c == '-'
}
