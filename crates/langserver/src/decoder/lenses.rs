//! Reference-count code lenses.

use tofuls_syntax::Span;

use super::PathContext;

#[derive(Debug, Clone, PartialEq)]
pub struct CodeLens {
  /// Span of the declaring block header.
  pub span: Span,
  pub ref_count: usize,
  /// Address of the declared entity the count refers to.
  pub addr: Vec<String>,
}

/// One lens per reference target declared in the file, counting matching
/// origins across the module.
pub fn reference_count_lenses(ctx: &PathContext, filename: &str) -> Vec<CodeLens> {
  let mut lenses: Vec<CodeLens> = ctx
    .record
    .ref_targets
    .iter()
    .filter(|target| target.filename == filename)
    .map(|target| {
      let ref_count = ctx.record.ref_origins.iter().filter(|origin| origin.matches(target)).count();
      CodeLens {
        span: target.span,
        ref_count,
        addr: target.addr.clone(),
      }
    })
    .collect();
  lenses.sort_by_key(|l| (l.span.start.line, l.span.start.character));
  lenses
}
