//! Decoder facade: the read side of the server.
//!
//! Every request first waits for the directory's outstanding jobs, then
//! builds a [`PathContext`] from a single store snapshot and answers from
//! it. The facade never mutates the store; contexts are request-scoped
//! and thrown away.

pub mod completion;
pub mod format;
pub mod hover;
pub mod lenses;
pub mod links;
pub mod navigation;
pub mod semantic_tokens;
pub mod symbols;
pub mod validate;

use std::{collections::BTreeMap, sync::Arc};

use tofuls_core::path::DirHandle;
use tofuls_store::{JobError, ModuleRecord, StateStore, StoreError};
use tofuls_syntax::{Span, addr::ModuleSourceAddr, schema::ProviderSchema};
use tokio_util::sync::CancellationToken;

pub use completion::{CompletionItem, CompletionItemKind};
pub use hover::HoverResult;
pub use lenses::CodeLens;
pub use links::Link;
pub use semantic_tokens::{SemanticToken, TokenType};
pub use symbols::Symbol;

#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("request cancelled")]
  Cancelled,

  #[error("file not found in module: {0}")]
  FileNotFound(String),
}

impl From<JobError> for DecoderError {
  fn from(err: JobError) -> Self {
    match err {
      JobError::Cancelled => DecoderError::Cancelled,
      other => DecoderError::Store(StoreError::Document(other.to_string())),
    }
  }
}

/// A cursor position in protocol terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocPosition {
  pub line: u32,
  pub character: u32,
}

/// One module-call input as the decoder sees it, whichever side (local
/// module record or registry metadata) supplied it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallInput {
  pub name: String,
  pub type_hint: Option<String>,
  pub description: Option<String>,
  pub required: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleCallView {
  pub local_name: String,
  pub source: ModuleSourceAddr,
  pub source_string: String,
  pub resolved_dir: Option<DirHandle>,
  pub inputs: Vec<CallInput>,
}

/// Everything a request needs about one directory, assembled from a
/// single snapshot.
#[derive(Clone)]
pub struct PathContext {
  pub dir: DirHandle,
  pub record: ModuleRecord,
  /// Provider schemas resolved for this module, by local provider name.
  pub provider_schemas: BTreeMap<String, Arc<ProviderSchema>>,
  pub module_calls: BTreeMap<String, ModuleCallView>,
}

impl PathContext {
  /// Schema block for a `resource`/`data` type, looked up first through
  /// the implied provider, then across all resolved schemas.
  pub fn schema_for_block_type(&self, is_data: bool, type_name: &str) -> Option<&tofuls_syntax::schema::SchemaBlock> {
    let implied = type_name.split('_').next().unwrap_or(type_name);
    if let Some(schema) = self.provider_schemas.get(implied)
      && let Some(block) = lookup_block_type(schema, is_data, type_name)
    {
      return Some(block);
    }
    self
      .provider_schemas
      .values()
      .find_map(|schema| lookup_block_type(schema, is_data, type_name))
  }
}

fn lookup_block_type<'a>(
  schema: &'a ProviderSchema,
  is_data: bool,
  type_name: &str,
) -> Option<&'a tofuls_syntax::schema::SchemaBlock> {
  if is_data {
    schema.data_sources.get(type_name)
  } else {
    schema.resources.get(type_name)
  }
}

/// The read-only facade over the store.
#[derive(Clone)]
pub struct Decoder {
  store: StateStore,
}

impl Decoder {
  pub fn new(store: StateStore) -> Self {
    Self { store }
  }

  /// Blocks until the directory's queued and running jobs (and their
  /// deferred follow-ups) are Done.
  pub async fn wait_for_dir(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<(), DecoderError> {
    let ids = self.store.jobs().list_incomplete_for_dir(dir);
    if ids.is_empty() {
      return Ok(());
    }
    self.store.jobs().wait_for(&ids, cancel).await?;
    Ok(())
  }

  /// Builds the request-scoped context from the current snapshot.
  pub fn path_context(&self, dir: &DirHandle) -> Result<PathContext, DecoderError> {
    let record = self.store.modules().record_by_path(dir)?;
    let schemas_store = self.store.provider_schemas();
    let roots = self.store.roots();
    let registry = self.store.registry_modules();

    let mut provider_schemas = BTreeMap::new();
    for (provider_ref, addr) in &record.meta.provider_references {
      // Aliased references resolve to the same schema as the bare name
      if provider_ref.alias.is_some() {
        continue;
      }
      let constraints = record.meta.provider_requirements.get(addr);
      if let Some(found) = schemas_store.schema_for(addr, constraints, dir) {
        provider_schemas.insert(provider_ref.local_name.clone(), found.schema);
      }
    }

    let mut module_calls = BTreeMap::new();
    for (name, call) in &record.meta.module_calls {
      let resolved_dir = match &call.source {
        ModuleSourceAddr::Local(rel) => Some(dir.join(rel)),
        ModuleSourceAddr::Registry(_) | ModuleSourceAddr::Remote(_) => roots
          .installed_module_path(dir, &call.source_string)
          .map(|rel| dir.join(rel)),
      };

      let mut inputs: Vec<CallInput> = Vec::new();
      if let Some(target) = resolved_dir.as_ref().and_then(|d| self.store.modules().record_by_path(d).ok()) {
        inputs.extend(target.meta.variables.values().map(|v| CallInput {
          name: v.name.clone(),
          type_hint: v.type_hint.clone(),
          description: v.description.clone(),
          required: v.is_required,
        }));
      } else if let ModuleSourceAddr::Registry(addr) = &call.source
        && let Some(cached) = registry.record(addr, &call.version.clone().unwrap_or_default())
        && let Some(data) = cached.data
      {
        inputs.extend(data.inputs.iter().map(|i| CallInput {
          name: i.name.clone(),
          type_hint: Some(i.type_hint.clone()),
          description: Some(i.description.clone()),
          required: i.required,
        }));
      }
      inputs.sort_by(|a, b| a.name.cmp(&b.name));

      module_calls.insert(
        name.clone(),
        ModuleCallView {
          local_name: name.clone(),
          source: call.source.clone(),
          source_string: call.source_string.clone(),
          resolved_dir,
          inputs,
        },
      );
    }

    Ok(PathContext {
      dir: dir.clone(),
      record,
      provider_schemas,
      module_calls,
    })
  }

  async fn context_for_request(
    &self,
    dir: &DirHandle,
    cancel: &CancellationToken,
  ) -> Result<PathContext, DecoderError> {
    self.wait_for_dir(dir, cancel).await?;
    self.path_context(dir)
  }

  // ==========================================================================
  // Request entry points
  // ==========================================================================

  pub async fn completion_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    pos: DocPosition,
    cancel: &CancellationToken,
  ) -> Result<Vec<CompletionItem>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    Ok(completion::completion_at(&ctx, filename, pos))
  }

  pub async fn hover_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    pos: DocPosition,
    cancel: &CancellationToken,
  ) -> Result<Option<HoverResult>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    Ok(hover::hover_at(&ctx, filename, pos))
  }

  pub async fn document_symbols_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<Symbol>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    let file = ctx
      .record
      .parsed_files
      .get(filename)
      .ok_or_else(|| DecoderError::FileNotFound(filename.to_string()))?;
    Ok(symbols::document_symbols(file))
  }

  /// Workspace-wide symbol query over every module in the store. Does not
  /// wait on jobs: symbol queries are global and best-effort by design.
  pub fn workspace_symbols(&self, query: &str) -> Vec<(DirHandle, Symbol)> {
    let mut out = Vec::new();
    for record in self.store.modules().list() {
      for (filename, file) in &record.parsed_files {
        for symbol in symbols::flat_symbols(filename, file) {
          if symbols::query_matches(query, &symbol.name) {
            out.push((record.dir.clone(), symbol));
          }
        }
      }
    }
    out
  }

  pub async fn code_lenses_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<CodeLens>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    Ok(lenses::reference_count_lenses(&ctx, filename))
  }

  pub async fn document_links_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<Link>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    Ok(links::document_links(&ctx, filename))
  }

  pub async fn semantic_tokens_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<SemanticToken>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    let file = ctx
      .record
      .parsed_files
      .get(filename)
      .ok_or_else(|| DecoderError::FileNotFound(filename.to_string()))?;
    Ok(semantic_tokens::tokens_for_file(file))
  }

  pub async fn definition_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    pos: DocPosition,
    cancel: &CancellationToken,
  ) -> Result<Option<(String, Span)>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    Ok(navigation::definition_at(&ctx, filename, pos))
  }

  pub async fn references_for_file(
    &self,
    dir: &DirHandle,
    filename: &str,
    pos: DocPosition,
    cancel: &CancellationToken,
  ) -> Result<Vec<(String, Span)>, DecoderError> {
    let ctx = self.context_for_request(dir, cancel).await?;
    Ok(navigation::references_at(&ctx, filename, pos))
  }
}
