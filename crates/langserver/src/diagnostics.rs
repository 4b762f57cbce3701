//! Diagnostics publisher.
//!
//! Subscribes to store change notifications and re-emits the full
//! per-file diagnostics of the affected module. Publishing the complete
//! set each time keeps the client consistent when one source's bag is
//! replaced while another's is appended.

use tofuls_core::{operation::DiagnosticSource, path::DirHandle};
use tofuls_store::{ChangeEvent, StateStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_lsp::Client;
use tracing::debug;

use crate::protocol;

fn source_label(source: DiagnosticSource) -> &'static str {
  match source {
    DiagnosticSource::Parsing => "opentofu",
    DiagnosticSource::ModuleCalls => "opentofu",
    DiagnosticSource::SchemaValidation => "opentofu (validation)",
    DiagnosticSource::ReferenceValidation => "opentofu (validation)",
    DiagnosticSource::ExternalToolValidate => "tofu validate",
  }
}

pub fn start_publisher(
  client: Client,
  store: StateStore,
  mut changes: mpsc::UnboundedReceiver<ChangeEvent>,
  cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        event = changes.recv() => {
          match event {
            Some(ChangeEvent { dir }) => publish_for_dir(&client, &store, &dir).await,
            None => break,
          }
        }
      }
    }
    debug!("diagnostics publisher stopped");
  })
}

async fn publish_for_dir(client: &Client, store: &StateStore, dir: &DirHandle) {
  let Ok(record) = store.modules().record_by_path(dir) else {
    // Module removed; nothing to publish against
    return;
  };

  for filename in record.known_filenames() {
    let handle = dir.document(&filename);
    let Some(uri) = protocol::uri_from_doc_handle(&handle) else {
      continue;
    };
    let diags: Vec<_> = record
      .file_diagnostics(&filename)
      .iter()
      .map(|(source, diag)| protocol::diagnostic(diag, source_label(*source)))
      .collect();
    client.publish_diagnostics(uri, diags, None).await;
  }
}
