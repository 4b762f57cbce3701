//! Span-carrying AST for the configuration language.

use serde::Serialize;

/// A point in a source file. `line` is zero-based, `character` counts
/// UTF-16 code units (protocol convention), `byte` indexes the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pos {
  pub line: u32,
  pub character: u32,
  pub byte: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
  pub start: Pos,
  pub end: Pos,
}

impl Span {
  pub fn new(start: Pos, end: Pos) -> Self {
    Self { start, end }
  }

  /// Whether the given point falls within this span (end-exclusive).
  pub fn contains(&self, line: u32, character: u32) -> bool {
    let after_start =
      line > self.start.line || (line == self.start.line && character >= self.start.character);
    let before_end = line < self.end.line || (line == self.end.line && character <= self.end.character);
    after_start && before_end
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
  Error,
  Warning,
}

/// A parse- or validation-produced diagnostic, still in source terms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
  pub severity: Severity,
  pub message: String,
  pub span: Span,
}

impl Diagnostic {
  pub fn error(message: impl Into<String>, span: Span) -> Self {
    Self {
      severity: Severity::Error,
      message: message.into(),
      span,
    }
  }

  pub fn warning(message: impl Into<String>, span: Span) -> Self {
    Self {
      severity: Severity::Warning,
      message: message.into(),
      span,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ident {
  pub name: String,
  pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringLit {
  pub value: String,
  pub span: Span,
}

/// A block label: `resource "aws_instance" "web"` carries two string
/// labels; identifiers are accepted in label position as well.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BlockLabel {
  String(StringLit),
  Ident(Ident),
}

impl BlockLabel {
  pub fn value(&self) -> &str {
    match self {
      BlockLabel::String(s) => &s.value,
      BlockLabel::Ident(i) => &i.name,
    }
  }

  pub fn span(&self) -> Span {
    match self {
      BlockLabel::String(s) => s.span,
      BlockLabel::Ident(i) => i.span,
    }
  }
}

/// A dotted reference such as `var.region` or `module.net.cidr`.
/// Index operations are consumed by the parser but not recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
  pub parts: Vec<String>,
  pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectEntry {
  pub key: String,
  pub key_span: Span,
  pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
  String(StringLit),
  Number { value: f64, span: Span },
  Bool { value: bool, span: Span },
  Null { span: Span },
  Reference(Reference),
  Array { items: Vec<Expression>, span: Span },
  Object { entries: Vec<ObjectEntry>, span: Span },
  /// Anything the expression grammar does not model (operators, heredocs,
  /// function calls); the raw text is preserved for display.
  Raw { text: String, span: Span },
}

impl Expression {
  pub fn span(&self) -> Span {
    match self {
      Expression::String(s) => s.span,
      Expression::Number { span, .. }
      | Expression::Bool { span, .. }
      | Expression::Null { span }
      | Expression::Array { span, .. }
      | Expression::Object { span, .. }
      | Expression::Raw { span, .. } => *span,
      Expression::Reference(r) => r.span,
    }
  }

  pub fn as_string(&self) -> Option<&str> {
    match self {
      Expression::String(s) => Some(&s.value),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
  pub key: Ident,
  pub value: Expression,
  pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
  pub block_type: Ident,
  pub labels: Vec<BlockLabel>,
  pub body: Body,
  /// From the first character of the type to the closing brace.
  pub span: Span,
}

impl Block {
  pub fn label_value(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(|l| l.value())
  }

  /// Display name in `type "label" "label"` form, used for symbols.
  pub fn symbol_name(&self) -> String {
    let mut name = self.block_type.name.clone();
    for label in &self.labels {
      name.push_str(&format!(" \"{}\"", label.value()));
    }
    name
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Body {
  pub blocks: Vec<Block>,
  pub attributes: Vec<Attribute>,
  pub span: Span,
}

impl Body {
  pub fn attribute(&self, name: &str) -> Option<&Attribute> {
    self.attributes.iter().find(|a| a.key.name == name)
  }

  pub fn blocks_of_type<'a>(&'a self, block_type: &'a str) -> impl Iterator<Item = &'a Block> {
    self.blocks.iter().filter(move |b| b.block_type.name == block_type)
  }
}

/// A fully parsed file. Equality is structural, which gives the parse
/// idempotence property: parsing unchanged bytes yields an equal tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct File {
  pub body: Body,
}

impl File {
  /// The innermost block containing the given position, with its nesting
  /// chain from outermost to innermost.
  pub fn block_chain_at(&self, line: u32, character: u32) -> Vec<&Block> {
    let mut chain = Vec::new();
    let mut body = &self.body;
    loop {
      let Some(block) = body.blocks.iter().find(|b| b.span.contains(line, character)) else {
        break;
      };
      chain.push(block);
      body = &block.body;
    }
    chain
  }
}
