//! Definition, declaration and references.

use tofuls_syntax::Span;

use super::{DocPosition, PathContext};

/// Declaration site for the reference under the cursor.
pub fn definition_at(ctx: &PathContext, filename: &str, pos: DocPosition) -> Option<(String, Span)> {
  let origin = ctx
    .record
    .ref_origins
    .iter()
    .find(|o| o.filename == filename && o.span.contains(pos.line, pos.character))?;
  let target = ctx.record.ref_targets.iter().find(|t| origin.matches(t))?;
  Some((target.filename.clone(), target.name_span))
}

/// All origins referring to the entity under the cursor. The cursor may
/// sit on the declaration or on any of its references.
pub fn references_at(ctx: &PathContext, filename: &str, pos: DocPosition) -> Vec<(String, Span)> {
  let target = ctx
    .record
    .ref_targets
    .iter()
    .find(|t| t.filename == filename && t.span.contains(pos.line, pos.character))
    .or_else(|| {
      let origin = ctx
        .record
        .ref_origins
        .iter()
        .find(|o| o.filename == filename && o.span.contains(pos.line, pos.character))?;
      ctx.record.ref_targets.iter().find(|t| origin.matches(t))
    });
  let Some(target) = target else { return Vec::new() };

  let mut out: Vec<(String, Span)> = ctx
    .record
    .ref_origins
    .iter()
    .filter(|origin| origin.matches(target))
    .map(|origin| (origin.filename.clone(), origin.span))
    .collect();
  out.sort_by(|a, b| {
    (a.0.as_str(), a.1.start.line, a.1.start.character).cmp(&(b.0.as_str(), b.1.start.line, b.1.start.character))
  });
  out
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;
  use std::sync::Arc;

  use tofuls_core::path::DirHandle;
  use tofuls_store::StateStore;
  use tofuls_syntax::{parse, reference};

  use super::*;

  fn context_for(src: &str) -> PathContext {
    let (store, _rx) = StateStore::new();
    let modules = store.modules();
    let dir = DirHandle::from_path("/mod");
    modules.add(&dir).unwrap();

    let (file, diags) = parse(src);
    assert!(diags.is_empty());
    let mut files = BTreeMap::new();
    files.insert("main.tf".to_string(), Arc::new(file));
    modules.update_parsed_files(&dir, files.clone(), BTreeMap::new()).unwrap();
    modules
      .update_ref_targets(&dir, reference::collect_targets("main.tf", &files["main.tf"]))
      .unwrap();
    modules
      .update_ref_origins(&dir, reference::collect_origins("main.tf", &files["main.tf"]))
      .unwrap();

    crate::decoder::Decoder::new(store).path_context(&dir).unwrap()
  }

  #[test]
  fn definition_resolves_reference_to_declaration() {
    let ctx = context_for("variable \"region\" {}\noutput \"r\" {\n  value = var.region\n}\n");
    // Cursor inside `var.region` on line 2
    let (file, span) = definition_at(&ctx, "main.tf", DocPosition { line: 2, character: 12 }).unwrap();
    assert_eq!(file, "main.tf");
    assert_eq!(span.start.line, 0);
  }

  #[test]
  fn references_from_declaration() {
    let ctx = context_for("variable \"region\" {}\noutput \"r\" {\n  value = var.region\n}\n");
    // Cursor on the variable declaration
    let refs = references_at(&ctx, "main.tf", DocPosition { line: 0, character: 3 });
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].1.start.line, 2);
  }
}
