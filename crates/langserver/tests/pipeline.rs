//! End-to-end pipeline tests over an in-memory filesystem: discovery,
//! the decode pipeline with its deferred fan-out, and the decoder facade
//! answering requests once the directory's jobs settle.

use std::sync::Arc;

use tofuls_core::{
  document::{DocumentContext, TextChange},
  fsview::{FileSystem, MemFileSystem},
  operation::{DiagnosticSource, OpState},
  path::DirHandle,
};
use tofuls_langserver::{
  decoder::DocPosition,
  schemas::{BundledSchemas, gzip_bytes, schema_path},
  session::Session,
};
use tofuls_store::{ChangeEvent, JobCtx, ModuleStage};
use tofuls_syntax::{addr::ProviderAddr, version::Version};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const REMOTE_STATE_SCHEMA: &str = r#"{
  "format_version": "1.0",
  "provider_schemas": {
    "registry.opentofu.org/builtin/terraform": {
      "data_source_schemas": {
        "terraform_remote_state": {
          "version": 0,
          "block": {
            "attributes": {
              "backend": { "type": "string", "description": "The remote backend to use.", "required": true },
              "config": { "type": "dynamic", "optional": true },
              "outputs": { "type": "dynamic", "computed": true }
            }
          }
        }
      }
    }
  }
}"#;

fn fixture_fs() -> MemFileSystem {
  let fs = MemFileSystem::new();
  fs.insert_file(
    schema_path(
      std::path::Path::new("/schemas"),
      &ProviderAddr::builtin("terraform"),
      &Version::new(1, 0, 0),
    ),
    gzip_bytes(REMOTE_STATE_SCHEMA.as_bytes()),
  );
  fs
}

fn session_over(fs: MemFileSystem) -> (Arc<Session>, UnboundedReceiver<ChangeEvent>) {
  let fs: Arc<dyn FileSystem> = Arc::new(fs);
  let bundled = BundledSchemas::new(fs.clone(), "/schemas");
  // Never reached in these tests; any connection attempt would fail fast
  let registry = tofuls_registry::Client::new("http://127.0.0.1:9");
  Session::new(fs, bundled, registry)
}

async fn open_and_settle(session: &Arc<Session>, path: &str, text: &str) {
  let handle = tofuls_core::path::DocHandle::from_path(std::path::Path::new(path)).unwrap();
  let ids = session
    .did_open_document(handle, "opentofu", 0, text.to_string())
    .await
    .unwrap();
  session
    .store
    .jobs()
    .wait_for(&ids, &CancellationToken::new())
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_code_lenses_for_independent_modules() {
  let fs = fixture_fs();
  let config = "data \"terraform_remote_state\" \"vpc\" { }\n";
  fs.insert_file("/a/main.tf", config.as_bytes().to_vec());
  fs.insert_file("/b/main.tf", config.as_bytes().to_vec());
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/a/main.tf", config).await;
  open_and_settle(&session, "/b/main.tf", config).await;

  let a = {
    let session = session.clone();
    tokio::spawn(async move {
      session
        .decoder
        .code_lenses_for_file(&DirHandle::from_path("/a"), "main.tf", &CancellationToken::new())
        .await
    })
  };
  let b = {
    let session = session.clone();
    tokio::spawn(async move {
      session
        .decoder
        .code_lenses_for_file(&DirHandle::from_path("/b"), "main.tf", &CancellationToken::new())
        .await
    })
  };

  let lenses_a = a.await.unwrap().unwrap();
  let lenses_b = b.await.unwrap().unwrap();
  assert_eq!(lenses_a.len(), 1);
  assert_eq!(lenses_b.len(), 1);
  assert_eq!(lenses_a[0].addr, vec!["data", "terraform_remote_state", "vpc"]);
  session.shutdown();
}

#[tokio::test]
async fn wait_for_covers_deferred_pipeline_jobs() {
  let fs = fixture_fs();
  let config = "data \"terraform_remote_state\" \"vpc\" { }\n";
  fs.insert_file("/mod/main.tf", config.as_bytes().to_vec());
  let (session, _changes) = session_over(fs);

  // Waiting on the didOpen job set must transitively cover everything
  // the metadata continuation spawned
  open_and_settle(&session, "/mod/main.tf", config).await;

  let record = session
    .store
    .modules()
    .record_by_path(&DirHandle::from_path("/mod"))
    .unwrap();
  assert_eq!(record.states.parse, OpState::LoadedOk);
  assert_eq!(record.states.metadata, OpState::LoadedOk);
  assert!(record.states.preload_schema.is_terminal());
  assert!(record.states.reference_targets.is_terminal());
  assert!(record.states.reference_origins.is_terminal());

  // The preloaded schema is now resolvable for the builtin provider
  let schema = session
    .store
    .provider_schemas()
    .schema_for(&ProviderAddr::builtin("terraform"), None, &DirHandle::from_path("/mod"));
  assert!(schema.is_some());
  session.shutdown();
}

#[tokio::test]
async fn second_metadata_run_skips_idempotently() {
  let fs = fixture_fs();
  fs.insert_file("/mod/main.tf", b"variable \"x\" {}\n".to_vec());
  let (session, _changes) = session_over(fs);
  let config = "variable \"x\" {}\n";

  open_and_settle(&session, "/mod/main.tf", config).await;
  let dir = DirHandle::from_path("/mod");
  let before = session.store.modules().record_by_path(&dir).unwrap();

  let ctx = JobCtx {
    cancel: CancellationToken::new(),
    ignore_state: false,
    document: None,
  };
  let err = tofuls_langserver::features::modules::jobs::load_module_metadata(&session.store.modules(), &dir, &ctx)
    .await
    .unwrap_err();
  assert!(err.is_state_not_changed());

  // No store mutation happened between the two runs
  let after = session.store.modules().record_by_path(&dir).unwrap();
  assert!(Arc::ptr_eq(&before.meta, &after.meta));
  assert_eq!(before.states.metadata, after.states.metadata);
  session.shutdown();
}

#[tokio::test]
async fn workspace_symbols_filter_returns_literal_range() {
  let fs = fixture_fs();
  fs.insert_file("/ws/first.tf", b"provider \"github\" {}".to_vec());
  fs.insert_file("/ws/second.tf", b"provider \"google\" {}".to_vec());
  fs.insert_file("/ws/blah/third.tf", b"myblock \"custom\" {}".to_vec());
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/ws/first.tf", "provider \"github\" {}").await;
  open_and_settle(&session, "/ws/second.tf", "provider \"google\" {}").await;
  open_and_settle(&session, "/ws/blah/third.tf", "myblock \"custom\" {}").await;

  let all = session.decoder.workspace_symbols("");
  let names: Vec<&str> = all.iter().map(|(_, s)| s.name.as_str()).collect();
  assert!(names.contains(&"provider \"github\""));
  assert!(names.contains(&"provider \"google\""));
  assert!(names.contains(&"myblock \"custom\""));

  let filtered = session.decoder.workspace_symbols("myb");
  assert_eq!(filtered.len(), 1);
  let (dir, symbol) = &filtered[0];
  assert_eq!(*dir, DirHandle::from_path("/ws/blah"));
  assert_eq!(symbol.name, "myblock \"custom\"");
  assert_eq!(symbol.span.start.line, 0);
  assert_eq!(symbol.span.start.character, 0);
  assert_eq!(symbol.span.end.character, 19);
  session.shutdown();
}

#[tokio::test]
async fn module_call_fan_out_feeds_completion() {
  let fs = fixture_fs();
  let root_config = "module \"refname\" {\n  source = \"./submodule\"\n\n}\n";
  fs.insert_file("/r/main.tf", root_config.as_bytes().to_vec());
  fs.insert_file(
    "/r/submodule/main.tf",
    b"variable \"testvar\" {\n  description = \"test variable\"\n}\n".to_vec(),
  );
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/r/main.tf", root_config).await;

  // The fan-out indexed the submodule without validation stages
  let sub = session
    .store
    .modules()
    .record_by_path(&DirHandle::from_path("/r/submodule"))
    .unwrap();
  assert_eq!(sub.states.metadata, OpState::LoadedOk);
  assert!(sub.meta.variables.contains_key("testvar"));

  // Completion on the blank line inside the module block offers the
  // submodule's input
  let items = session
    .decoder
    .completion_for_file(
      &DirHandle::from_path("/r"),
      "main.tf",
      DocPosition { line: 2, character: 0 },
      &CancellationToken::new(),
    )
    .await
    .unwrap();
  let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
  assert!(labels.contains(&"testvar"), "labels: {labels:?}");
  assert!(labels.contains(&"version"));
  assert!(!labels.contains(&"source"), "source is already present");
  session.shutdown();
}

#[tokio::test]
async fn repeated_completion_is_deterministic() {
  let fs = fixture_fs();
  let config = "data \"terraform_remote_state\" \"vpc\" {\n\n}\n";
  fs.insert_file("/mod/main.tf", config.as_bytes().to_vec());
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/mod/main.tf", config).await;

  let dir = DirHandle::from_path("/mod");
  let pos = DocPosition { line: 1, character: 0 };
  let first = session
    .decoder
    .completion_for_file(&dir, "main.tf", pos, &CancellationToken::new())
    .await
    .unwrap();
  let second = session
    .decoder
    .completion_for_file(&dir, "main.tf", pos, &CancellationToken::new())
    .await
    .unwrap();

  assert!(!first.is_empty());
  assert_eq!(first, second, "item list and ordering must be stable");
  let labels: Vec<&str> = first.iter().map(|i| i.label.as_str()).collect();
  assert!(labels.contains(&"backend"));
  assert!(!labels.contains(&"outputs"), "computed-only attributes are not offered");
  session.shutdown();
}

#[tokio::test]
async fn unsaved_edits_drive_the_pipeline() {
  let fs = fixture_fs();
  let on_disk = "variable \"old\" {}\n";
  fs.insert_file("/mod/main.tf", on_disk.as_bytes().to_vec());
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/mod/main.tf", on_disk).await;
  let dir = DirHandle::from_path("/mod");
  assert!(session.store.modules().record_by_path(&dir).unwrap().meta.variables.contains_key("old"));

  // Edit the buffer without saving; the pipeline must observe the
  // overlay text, not the stale disk bytes
  let handle = dir.document("main.tf");
  let ids = session
    .did_change_document(
      &handle,
      1,
      &[TextChange {
        range: None,
        text: "variable \"new\" {}\n".into(),
      }],
    )
    .unwrap();
  session
    .store
    .jobs()
    .wait_for(&ids, &CancellationToken::new())
    .await
    .unwrap();

  let record = session.store.modules().record_by_path(&dir).unwrap();
  assert!(record.meta.variables.contains_key("new"), "edited variable missing");
  assert!(!record.meta.variables.contains_key("old"), "stale disk variable survived");

  let symbols = session.decoder.workspace_symbols("new");
  assert_eq!(symbols.len(), 1);
  assert_eq!(symbols[0].1.name, "variable \"new\"");
  session.shutdown();
}

#[tokio::test]
async fn validation_finalizes_stage_when_changed_file_is_missing() {
  let fs = fixture_fs();
  let config = "variable \"x\" {}\n";
  fs.insert_file("/mod/main.tf", config.as_bytes().to_vec());
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/mod/main.tf", config).await;
  let dir = DirHandle::from_path("/mod");

  // A didChange naming a file that is not in the parsed set must still
  // drive the validation stage to a terminal state
  let ctx = JobCtx {
    cancel: CancellationToken::new(),
    ignore_state: false,
    document: Some(DocumentContext {
      method: "textDocument/didChange".to_string(),
      language_id: "opentofu".to_string(),
      filename: "ghost.tf".to_string(),
    }),
  };
  tofuls_langserver::features::modules::jobs::schema_module_validation(&session.store, &dir, &ctx)
    .await
    .unwrap();

  let record = session.store.modules().record_by_path(&dir).unwrap();
  let stage = record.states.get(ModuleStage::Diagnostics(DiagnosticSource::SchemaValidation));
  assert!(stage.is_terminal(), "stage left in {stage:?}");

  // A follow-up run without ignore-state skips idempotently instead of
  // finding the stage wedged in Loading
  let err = tofuls_langserver::features::modules::jobs::schema_module_validation(&session.store, &dir, &ctx)
    .await
    .unwrap_err();
  assert!(err.is_state_not_changed());
  session.shutdown();
}

#[tokio::test]
async fn parse_twice_yields_identical_ast() {
  let fs = fixture_fs();
  let config = "module \"net\" {\n  source = \"./net\"\n}\n";
  fs.insert_file("/mod/main.tf", config.as_bytes().to_vec());
  fs.insert_file("/mod/net/main.tf", b"variable \"cidr\" {}\n".to_vec());
  let (session, _changes) = session_over(fs);

  open_and_settle(&session, "/mod/main.tf", config).await;
  let dir = DirHandle::from_path("/mod");
  let first = session.store.modules().record_by_path(&dir).unwrap();

  // Re-run the whole pipeline with ignore-state against unchanged bytes
  let ids = session.modules.did_change(&dir, None);
  session
    .store
    .jobs()
    .wait_for(&ids, &CancellationToken::new())
    .await
    .unwrap();

  let second = session.store.modules().record_by_path(&dir).unwrap();
  assert_eq!(first.parsed_files["main.tf"], second.parsed_files["main.tf"]);
  session.shutdown();
}
