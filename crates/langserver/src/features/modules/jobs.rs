//! Job bodies of the module pipeline.
//!
//! Every body follows the same discipline: claim its stage (the
//! idempotent-skip check), do the work through the filesystem view or
//! store snapshots, then commit results in a single write. A body that
//! observes cancellation returns before committing, leaving the stage
//! re-runnable with ignore-state.

use std::{collections::BTreeMap, sync::Arc};

use tofuls_core::{fsview::FileSystem, operation::DiagnosticSource, path::DirHandle};
use tofuls_store::{JobCtx, JobError, ModuleStage, ModuleStore, ProviderSchemaStore, SchemaSource, StateStore};
use tofuls_syntax::{Diagnostic, addr::ModuleSourceAddr, metadata, reference};
use tracing::{debug, trace, warn};

use crate::decoder::{Decoder, validate};
use crate::schemas::BundledSchemas;

/// Reads and parses every module file in the directory.
pub async fn parse_module_configuration(
  fs: &Arc<dyn FileSystem>,
  modules: &ModuleStore,
  dir: &DirHandle,
  ctx: &JobCtx,
) -> Result<(), JobError> {
  modules.begin_operation(dir, ModuleStage::Parse, ctx.ignore_state)?;

  match read_and_parse(fs, dir, ctx).await {
    Ok((files, diagnostics)) => {
      trace!(%dir, files = files.len(), "module files parsed");
      modules.update_parsed_files(dir, files, diagnostics)?;
      Ok(())
    }
    Err(err) => {
      modules.fail_stage(dir, ModuleStage::Parse)?;
      Err(err)
    }
  }
}

type ParsedFiles = (BTreeMap<String, Arc<tofuls_syntax::File>>, BTreeMap<String, Vec<Diagnostic>>);

async fn read_and_parse(fs: &Arc<dyn FileSystem>, dir: &DirHandle, ctx: &JobCtx) -> Result<ParsedFiles, JobError> {
  let entries = fs
    .read_dir(dir.path(), &ctx.cancel)
    .await
    .map_err(JobError::other)?;

  let mut files = BTreeMap::new();
  let mut diagnostics = BTreeMap::new();
  for entry in entries.iter().filter(|e| !e.is_dir) {
    if !tofuls_walker::is_module_filename(&entry.name) {
      continue;
    }
    let bytes = fs
      .read_file(&dir.path().join(&entry.name), &ctx.cancel)
      .await
      .map_err(JobError::other)?;
    let source = String::from_utf8_lossy(&bytes);
    let (file, diags) = tofuls_syntax::parse(&source);
    files.insert(entry.name.clone(), Arc::new(file));
    diagnostics.insert(entry.name.clone(), diags);
  }
  Ok((files, diagnostics))
}

/// Extracts version-independent module facts from the parsed ASTs.
pub async fn load_module_metadata(modules: &ModuleStore, dir: &DirHandle, ctx: &JobCtx) -> Result<(), JobError> {
  let record = modules.record_by_path(dir)?;
  modules.begin_operation(dir, ModuleStage::Metadata, ctx.ignore_state)?;

  let (meta, diags) = metadata::load_module(&record.parsed_files);
  let mut by_file: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();
  for (filename, diag) in diags {
    by_file.entry(filename).or_default().push(diag);
  }

  trace!(
    %dir,
    providers = meta.provider_requirements.len(),
    module_calls = meta.module_calls.len(),
    "module metadata decoded"
  );
  modules.update_metadata(dir, meta, !by_file.is_empty())?;
  modules.update_diagnostics(dir, DiagnosticSource::ModuleCalls, by_file)?;
  Ok(())
}

/// Loads bundled provider schemas for every provider the module requires.
pub async fn preload_embedded_schema(
  bundled: &BundledSchemas,
  schemas: &ProviderSchemaStore,
  modules: &ModuleStore,
  dir: &DirHandle,
  ctx: &JobCtx,
) -> Result<(), JobError> {
  let record = modules.record_by_path(dir)?;
  modules.begin_operation(dir, ModuleStage::PreloadSchema, ctx.ignore_state)?;

  let mut ok = true;
  for (addr, constraints) in record.meta.provider_requirements.iter() {
    if schemas.has_schema(addr) {
      trace!(%dir, %addr, "schema already present, skipping preload");
      continue;
    }
    match bundled.load(addr, Some(constraints), &ctx.cancel).await {
      Ok(Some((version, schema))) => {
        debug!(%dir, %addr, %version, "provider schema preloaded");
        schemas
          .add(addr.clone(), version, SchemaSource::Preloaded, schema)
          .map_err(JobError::from)?;
      }
      Ok(None) => {
        trace!(%dir, %addr, "no bundled schema available");
      }
      Err(err) => {
        warn!(%dir, %addr, error = %err, "failed to preload schema");
        ok = false;
      }
    }
  }

  modules.finish_preload(dir, ok)?;
  Ok(())
}

/// Computes addressable reference targets across the module.
pub async fn decode_reference_targets(modules: &ModuleStore, dir: &DirHandle, ctx: &JobCtx) -> Result<(), JobError> {
  let record = modules.record_by_path(dir)?;
  modules.begin_operation(dir, ModuleStage::ReferenceTargets, ctx.ignore_state)?;

  let mut targets = Vec::new();
  for (filename, file) in &record.parsed_files {
    targets.extend(reference::collect_targets(filename, file));
  }

  trace!(%dir, targets = targets.len(), "reference targets decoded");
  modules.update_ref_targets(dir, targets)?;
  Ok(())
}

/// Computes reference origin positions across the module.
pub async fn decode_reference_origins(modules: &ModuleStore, dir: &DirHandle, ctx: &JobCtx) -> Result<(), JobError> {
  let record = modules.record_by_path(dir)?;
  modules.begin_operation(dir, ModuleStage::ReferenceOrigins, ctx.ignore_state)?;

  let mut origins = Vec::new();
  for (filename, file) in &record.parsed_files {
    origins.extend(reference::collect_origins(filename, file));
  }

  trace!(%dir, origins = origins.len(), "reference origins decoded");
  modules.update_ref_origins(dir, origins)?;
  Ok(())
}

/// Schema-based validation. On a `didChange` only the changed file is
/// revalidated; any other trigger validates the whole module.
pub async fn schema_module_validation(store: &StateStore, dir: &DirHandle, ctx: &JobCtx) -> Result<(), JobError> {
  let modules = store.modules();
  modules.begin_operation(dir, ModuleStage::Diagnostics(DiagnosticSource::SchemaValidation), ctx.ignore_state)?;

  let path_ctx = match Decoder::new(store.clone()).path_context(dir) {
    Ok(path_ctx) => path_ctx,
    Err(err) => {
      modules.fail_stage(dir, ModuleStage::Diagnostics(DiagnosticSource::SchemaValidation))?;
      return Err(JobError::other(err));
    }
  };

  let single_file = ctx.document.as_ref().and_then(|doc| {
    (doc.method == "textDocument/didChange" && crate::is_valid_config_language(&doc.language_id))
      .then(|| doc.filename.clone())
  });

  match single_file {
    Some(filename) => {
      let Some(file) = path_ctx.record.parsed_files.get(&filename) else {
        // The changed file is no longer part of the parsed set; commit
        // an empty bag so the stage reaches a terminal state and stays
        // re-runnable
        modules.update_file_diagnostics(dir, DiagnosticSource::SchemaValidation, &filename, Vec::new())?;
        return Ok(());
      };
      let diags = validate::validate_file(&path_ctx, file);
      modules.update_file_diagnostics(dir, DiagnosticSource::SchemaValidation, &filename, diags)?;
    }
    None => {
      let diags = validate::validate_module(&path_ctx);
      modules.update_diagnostics(dir, DiagnosticSource::SchemaValidation, diags)?;
    }
  }
  Ok(())
}

/// Flags reference origins that no declared target satisfies.
pub async fn reference_validation(store: &StateStore, dir: &DirHandle, ctx: &JobCtx) -> Result<(), JobError> {
  let modules = store.modules();
  modules.begin_operation(
    dir,
    ModuleStage::Diagnostics(DiagnosticSource::ReferenceValidation),
    ctx.ignore_state,
  )?;

  let path_ctx = match Decoder::new(store.clone()).path_context(dir) {
    Ok(path_ctx) => path_ctx,
    Err(err) => {
      modules.fail_stage(dir, ModuleStage::Diagnostics(DiagnosticSource::ReferenceValidation))?;
      return Err(JobError::other(err));
    }
  };
  let diags = validate::unreferenced_origins(&path_ctx);
  modules.update_diagnostics(dir, DiagnosticSource::ReferenceValidation, diags)?;
  Ok(())
}

/// Low-priority registry metadata pull for declared registry modules.
pub async fn get_module_data_from_registry(
  client: &tofuls_registry::Client,
  store: &StateStore,
  dir: &DirHandle,
  ctx: &JobCtx,
) -> Result<(), JobError> {
  let modules = store.modules();
  let registry = store.registry_modules();
  let record = modules.record_by_path(dir)?;
  modules.begin_operation(dir, ModuleStage::RegistryFetch, ctx.ignore_state)?;

  let mut ok = true;
  for call in record.meta.module_calls.values() {
    let ModuleSourceAddr::Registry(addr) = &call.source else {
      continue;
    };
    let constraints = call.version.clone().unwrap_or_default();
    if registry.exists(addr, &constraints) {
      trace!(%dir, %addr, "registry metadata cached, skipping fetch");
      continue;
    }
    if ctx.cancel.is_cancelled() {
      // Terminalize the stage before bailing so a later run without
      // ignore-state is not turned away by the idempotent-skip check
      modules.fail_stage(dir, ModuleStage::RegistryFetch)?;
      return Err(JobError::Cancelled);
    }

    match client.module_data(addr, &constraints).await {
      Ok((version, data)) => {
        debug!(%dir, %addr, %version, "registry module data fetched");
        registry
          .cache_data(
            addr,
            &constraints,
            tofuls_store::RegistryModuleData {
              version,
              inputs: data
                .inputs
                .into_iter()
                .map(|(name, input)| tofuls_store::RegistryInput {
                  name: if input.name.is_empty() { name } else { input.name },
                  type_hint: input.type_hint,
                  description: input.description,
                  required: input.required,
                })
                .collect(),
              outputs: data
                .outputs
                .into_iter()
                .map(|(name, output)| tofuls_store::RegistryOutput {
                  name: if output.name.is_empty() { name } else { output.name },
                  description: output.description,
                })
                .collect(),
            },
          )
          .map_err(JobError::from)?;
      }
      Err(err) if err.is_client_error() => {
        // Cached as a negative entry; retried on the next enqueue
        warn!(%dir, %addr, error = %err, "registry rejected module data request");
        registry.cache_error(addr, &constraints, err.to_string()).map_err(JobError::from)?;
        ok = false;
      }
      Err(err) => {
        warn!(%dir, %addr, error = %err, "registry request failed");
        ok = false;
      }
    }
  }

  modules.finish_registry_fetch(dir, ok)?;
  Ok(())
}
