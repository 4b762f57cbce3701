//! Formatting.
//!
//! Line-oriented canonical formatting: two-space indentation derived
//! from brace/bracket depth and trailing-whitespace removal. The
//! formatter works on raw text so it behaves sensibly on files the
//! parser only partially understands.

/// Returns the formatted text, or `None` when the input is already
/// canonical.
pub fn format_text(text: &str) -> Option<String> {
  let mut out = String::with_capacity(text.len());
  let mut depth: usize = 0;

  for line in text.split_inclusive('\n') {
    let (content, newline) = match line.strip_suffix('\n') {
      Some(rest) => (rest, "\n"),
      None => (line, ""),
    };
    let trimmed = content.trim();

    if trimmed.is_empty() {
      out.push_str(newline);
      continue;
    }

    let leading_closers = trimmed
      .chars()
      .take_while(|c| matches!(c, '}' | ']' | ')'))
      .count();
    let line_depth = depth.saturating_sub(leading_closers);

    for _ in 0..line_depth {
      out.push_str("  ");
    }
    out.push_str(trimmed);
    out.push_str(newline);

    depth = next_depth(depth, trimmed);
  }

  if out == text { None } else { Some(out) }
}

/// Brace depth after a line, ignoring braces inside strings and comments.
fn next_depth(depth: usize, line: &str) -> usize {
  let mut depth = depth as isize;
  let mut chars = line.chars().peekable();
  let mut in_string = false;

  while let Some(c) = chars.next() {
    match c {
      '\\' if in_string => {
        chars.next();
      }
      '"' => in_string = !in_string,
      '#' if !in_string => break,
      '/' if !in_string && chars.peek() == Some(&'/') => break,
      '{' | '[' | '(' if !in_string => depth += 1,
      '}' | ']' | ')' if !in_string => depth -= 1,
      _ => {}
    }
  }
  depth.max(0) as usize
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reindents_nested_blocks() {
    let input = "resource \"a\" \"b\" {\nami = 1\n    tags = {\n   Name = \"x\"\n }\n}\n";
    let expected = "resource \"a\" \"b\" {\n  ami = 1\n  tags = {\n    Name = \"x\"\n  }\n}\n";
    assert_eq!(format_text(input).as_deref(), Some(expected));
  }

  #[test]
  fn canonical_input_returns_none() {
    let input = "variable \"x\" {\n  default = 1\n}\n";
    assert_eq!(format_text(input), None);
  }

  #[test]
  fn braces_in_strings_are_ignored() {
    let input = "a = \"{not a brace\"\nb = 2\n";
    assert_eq!(format_text(input), None);
  }

  #[test]
  fn formatting_is_idempotent() {
    let input = "  resource \"a\" \"b\" {\n      x = 1\n   }\n";
    let once = format_text(input).unwrap();
    assert_eq!(format_text(&once), None);
  }
}
