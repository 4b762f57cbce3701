//! Hover.

use tofuls_syntax::Span;

use super::{DocPosition, PathContext};

#[derive(Debug, Clone, PartialEq)]
pub struct HoverResult {
  /// Markdown content.
  pub content: String,
  pub span: Span,
}

pub fn hover_at(ctx: &PathContext, filename: &str, pos: DocPosition) -> Option<HoverResult> {
  let file = ctx.record.parsed_files.get(filename)?;
  let chain = file.block_chain_at(pos.line, pos.character);
  let outer = chain.first()?;
  let innermost = chain.last()?;

  // Attribute name under the cursor?
  if let Some(attr) = innermost
    .body
    .attributes
    .iter()
    .find(|a| a.key.span.contains(pos.line, pos.character))
  {
    return attribute_hover(ctx, &chain, &attr.key.name, attr.key.span);
  }

  // Reference under the cursor?
  if let Some(origin) = ctx
    .record
    .ref_origins
    .iter()
    .find(|o| o.filename == filename && o.span.contains(pos.line, pos.character))
  {
    let target = ctx.record.ref_targets.iter().find(|t| {
      origin.addr.len() >= t.addr.len() && origin.addr[..t.addr.len()] == t.addr[..]
    })?;
    let mut content = format!("`{}`", target.addr.join("."));
    if let Some(description) = &target.description {
      content.push_str("\n\n");
      content.push_str(description);
    }
    return Some(HoverResult {
      content,
      span: origin.span,
    });
  }

  // Block header
  if outer.block_type.span.contains(pos.line, pos.character) {
    let content = match outer.block_type.name.as_str() {
      "resource" => "A `resource` block declares infrastructure managed by a provider.".to_string(),
      "data" => "A `data` block reads from an existing data source.".to_string(),
      "module" => "A `module` block calls another module.".to_string(),
      "variable" => "A `variable` block declares an input variable.".to_string(),
      "output" => "An `output` block exposes a value to callers.".to_string(),
      "provider" => "A `provider` block configures a provider.".to_string(),
      "terraform" => "Core settings for this module.".to_string(),
      "locals" => "Local value definitions.".to_string(),
      other => format!("`{other}` block"),
    };
    return Some(HoverResult {
      content,
      span: outer.block_type.span,
    });
  }

  None
}

fn attribute_hover(
  ctx: &PathContext,
  chain: &[&tofuls_syntax::Block],
  name: &str,
  span: Span,
) -> Option<HoverResult> {
  let outer = chain.first()?;
  match outer.block_type.name.as_str() {
    "resource" | "data" => {
      let is_data = outer.block_type.name == "data";
      let schema = ctx.schema_for_block_type(is_data, outer.label_value(0)?)?;
      let mut block = schema;
      for nested in &chain[1..] {
        block = block.blocks.get(&nested.block_type.name)?;
      }
      let attr = block.attributes.get(name)?;
      let mut content = format!("**{name}** `{}`", attr.type_hint);
      if attr.required {
        content.push_str(" *(required)*");
      }
      if let Some(description) = &attr.description {
        content.push_str("\n\n");
        content.push_str(description);
      }
      Some(HoverResult { content, span })
    }
    "module" => {
      let call = ctx.module_calls.get(outer.label_value(0)?)?;
      let input = call.inputs.iter().find(|i| i.name == name)?;
      let mut content = format!("**{name}**");
      if let Some(type_hint) = &input.type_hint {
        content.push_str(&format!(" `{type_hint}`"));
      }
      if input.required {
        content.push_str(" *(required)*");
      }
      if let Some(description) = &input.description {
        content.push_str("\n\n");
        content.push_str(description);
      }
      Some(HoverResult { content, span })
    }
    _ => None,
  }
}
