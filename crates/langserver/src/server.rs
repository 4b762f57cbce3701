//! LSP surface over the session.
//!
//! The backend is a thin translation layer: requests map URIs to
//! handles, call into the decoder facade or feature layer, and convert
//! results back to protocol structures. All policy lives below.

use std::sync::{Arc, RwLock, atomic::Ordering};

use serde_json::json;
use tofuls_core::settings::decode_options;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::{Error as RpcError, Result as RpcResult};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

use crate::{
  commands::{CommandError, CommandHandler, command_names},
  decoder::{self, CompletionItemKind as ItemKind, DocPosition, TokenType},
  diagnostics, protocol,
  session::{ExperimentalCaps, Session},
};

/// Token types the server can emit, in preference order.
const SUPPORTED_TOKEN_TYPES: &[TokenType] = &[
  TokenType::Type,
  TokenType::EnumMember,
  TokenType::Property,
  TokenType::Variable,
  TokenType::String,
  TokenType::Number,
  TokenType::Keyword,
];

pub struct Backend {
  client: Client,
  session: Arc<Session>,
  commands: CommandHandler,
  /// Legend negotiated at initialize: our token types the client can
  /// render, in legend order.
  legend: RwLock<Vec<TokenType>>,
}

impl Backend {
  pub fn new(client: Client, session: Arc<Session>) -> Self {
    Self {
      client,
      commands: CommandHandler::new(session.clone()),
      session,
      legend: RwLock::new(Vec::new()),
    }
  }

  fn request_cancel(&self) -> CancellationToken {
    self.session.cancel.child_token()
  }

  async fn flush_warnings(&self) {
    for message in self.session.take_warnings() {
      self.client.show_message(MessageType::WARNING, message).await;
    }
  }

  fn doc_position(pos: Position) -> DocPosition {
    DocPosition {
      line: pos.line,
      character: pos.character,
    }
  }
}

fn internal_error(err: impl std::fmt::Display) -> RpcError {
  let mut rpc = RpcError::internal_error();
  rpc.message = err.to_string().into();
  rpc
}

fn invalid_params(err: impl std::fmt::Display) -> RpcError {
  RpcError::invalid_params(err.to_string())
}

fn completion_kind(kind: ItemKind) -> CompletionItemKind {
  match kind {
    ItemKind::BlockType => CompletionItemKind::CLASS,
    ItemKind::Attribute => CompletionItemKind::PROPERTY,
    ItemKind::Reference => CompletionItemKind::VARIABLE,
  }
}

fn symbol_kind(kind: decoder::symbols::SymbolKindHint) -> SymbolKind {
  match kind {
    decoder::symbols::SymbolKindHint::Block => SymbolKind::CLASS,
    decoder::symbols::SymbolKindHint::Attribute => SymbolKind::PROPERTY,
  }
}

fn document_symbol(sym: decoder::Symbol) -> DocumentSymbol {
  #[allow(deprecated)]
  DocumentSymbol {
    name: sym.name,
    detail: None,
    kind: symbol_kind(sym.kind),
    tags: None,
    deprecated: None,
    range: protocol::range(sym.span),
    selection_range: protocol::range(sym.span),
    children: if sym.children.is_empty() {
      None
    } else {
      Some(sym.children.into_iter().map(document_symbol).collect())
    },
  }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
  #[allow(deprecated)] // root_uri is deprecated upstream but still what clients send
  async fn initialize(&self, params: InitializeParams) -> RpcResult<InitializeResult> {
    let decoded = decode_options(params.initialization_options).map_err(invalid_params)?;
    if !decoded.unused_keys.is_empty() {
      self
        .session
        .push_warning(format!("Unknown configuration options: {:?}", decoded.unused_keys));
    }
    let options = decoded.options;

    for (raw, key) in [
      (&options.legacy_root_module_paths, "rootModulePaths"),
      (&options.legacy_exclude_module_paths, "excludeModulePaths"),
      (&options.legacy_ignore_directory_names, "ignoreDirectoryNames"),
    ] {
      if !raw.is_empty() {
        self
          .session
          .push_warning(format!("{key} ({raw:?}) is deprecated (no-op), use indexing.* instead"));
      }
    }

    // Experimental capabilities are a two-way negotiation: the client
    // names its command ids, the server answers with matching flags
    let exp_caps = experimental_caps(params.capabilities.experimental.as_ref());
    let mut exp_server = serde_json::Map::new();
    if exp_caps.show_references_command.is_some() {
      exp_server.insert("referenceCountCodeLens".into(), json!(true));
    }
    if exp_caps.refresh_module_providers {
      exp_server.insert("refreshModuleProviders".into(), json!(true));
    }
    if exp_caps.refresh_module_calls {
      exp_server.insert("refreshModuleCalls".into(), json!(true));
    }
    if exp_caps.refresh_tool_version {
      exp_server.insert("refreshTerraformVersion".into(), json!(true));
    }
    self.session.set_experimental(exp_caps);

    // Legend: the intersection of what we emit and what the client
    // advertised, in our preference order
    let client_types: Vec<String> = params
      .capabilities
      .text_document
      .as_ref()
      .and_then(|td| td.semantic_tokens.as_ref())
      .map(|st| st.token_types.iter().map(|t| t.as_str().to_string()).collect())
      .unwrap_or_default();
    let legend: Vec<TokenType> = SUPPORTED_TOKEN_TYPES
      .iter()
      .copied()
      .filter(|t| client_types.iter().any(|c| c == t.as_lsp_name()))
      .collect();
    let legend_types: Vec<SemanticTokenType> = legend
      .iter()
      .map(|t| SemanticTokenType::new(t.as_lsp_name()))
      .collect();
    *self.legend.write().expect("legend lock poisoned") = legend;

    // Root handling: no root means single-file mode with reduced
    // functionality
    let mut root = None;
    match &params.root_uri {
      None => {
        self.session.single_file_mode.store(true, Ordering::SeqCst);
        if !options.ignore_single_file_warning {
          self.session.push_warning(
            "Some capabilities may be reduced when editing a single file. \
             We recommend opening a directory for full functionality. \
             Use 'ignoreSingleFileWarning' to suppress this warning."
              .to_string(),
          );
        }
      }
      Some(uri) => {
        if protocol::is_wsl_uri(uri.as_str()) {
          let mut err = invalid_params(format!(
            "Unsupported or invalid URI: {uri:?}. This is most likely a client bug, please report it."
          ));
          err.data = Some(json!("INVALID_URI_WSL"));
          return Err(err);
        }
        let dir = protocol::dir_handle_from_uri(uri).map_err(invalid_params)?;
        self.session.enqueue_workspace_dir(&dir).map_err(internal_error)?;
        root = Some(dir);
      }
    }

    if let Some(folders) = &params.workspace_folders {
      for folder in folders {
        match protocol::dir_handle_from_uri(&folder.uri) {
          Ok(dir) => {
            if let Err(err) = self.session.enqueue_workspace_dir(&dir) {
              self.session.push_warning(format!("Ignoring workspace folder {}: {err}", folder.uri));
            }
          }
          Err(err) => {
            self
              .session
              .push_warning(format!("Ignoring workspace folder (unsupported or invalid URI): {err}"));
          }
        }
      }
    }

    let command_prefix = options.command_prefix.clone();
    self.session.configure(options, root.as_ref());

    info!(?root, "session initialized");

    Ok(InitializeResult {
      capabilities: ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
          open_close: Some(true),
          change: Some(TextDocumentSyncKind::INCREMENTAL),
          ..Default::default()
        })),
        completion_provider: Some(CompletionOptions {
          resolve_provider: Some(true),
          trigger_characters: Some(vec![".".to_string(), "[".to_string()]),
          ..Default::default()
        }),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
        code_lens_provider: Some(CodeLensOptions { resolve_provider: Some(false) }),
        declaration_provider: Some(DeclarationCapability::Simple(true)),
        definition_provider: Some(OneOf::Left(true)),
        references_provider: Some(OneOf::Left(true)),
        document_formatting_provider: Some(OneOf::Left(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        workspace_symbol_provider: Some(OneOf::Left(true)),
        signature_help_provider: Some(SignatureHelpOptions {
          trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
          ..Default::default()
        }),
        execute_command_provider: Some(ExecuteCommandOptions {
          commands: command_names(&command_prefix),
          work_done_progress_options: WorkDoneProgressOptions {
            work_done_progress: Some(true),
          },
        }),
        semantic_tokens_provider: Some(SemanticTokensServerCapabilities::SemanticTokensOptions(
          SemanticTokensOptions {
            legend: SemanticTokensLegend {
              token_types: legend_types,
              token_modifiers: Vec::new(),
            },
            full: Some(SemanticTokensFullOptions::Bool(true)),
            ..Default::default()
          },
        )),
        document_link_provider: Some(DocumentLinkOptions {
          resolve_provider: Some(false),
          work_done_progress_options: Default::default(),
        }),
        workspace: Some(WorkspaceServerCapabilities {
          workspace_folders: Some(WorkspaceFoldersServerCapabilities {
            supported: Some(true),
            change_notifications: Some(OneOf::Left(true)),
          }),
          file_operations: None,
        }),
        experimental: if exp_server.is_empty() {
          None
        } else {
          Some(serde_json::Value::Object(exp_server))
        },
        ..Default::default()
      },
      server_info: Some(ServerInfo {
        name: "tofu-ls".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
      }),
    })
  }

  async fn initialized(&self, _params: InitializedParams) {
    self.session.start_walkers();
    self.flush_warnings().await;
    debug!("walkers started");
  }

  async fn shutdown(&self) -> RpcResult<()> {
    self.session.shutdown();
    Ok(())
  }

  async fn did_open(&self, params: DidOpenTextDocumentParams) {
    let doc = params.text_document;
    let Ok(handle) = protocol::doc_handle_from_uri(&doc.uri) else {
      warn!(uri = %doc.uri, "ignoring didOpen with non-file URI");
      return;
    };
    if let Err(err) = self
      .session
      .did_open_document(handle, &doc.language_id, doc.version, doc.text)
      .await
    {
      warn!(uri = %doc.uri, error = %err, "didOpen failed");
    }
    self.flush_warnings().await;
  }

  async fn did_change(&self, params: DidChangeTextDocumentParams) {
    let Ok(handle) = protocol::doc_handle_from_uri(&params.text_document.uri) else {
      return;
    };
    let changes = protocol::text_changes(&params.content_changes);
    if let Err(err) = self
      .session
      .did_change_document(&handle, params.text_document.version, &changes)
    {
      warn!(uri = %params.text_document.uri, error = %err, "didChange failed");
    }
  }

  async fn did_close(&self, params: DidCloseTextDocumentParams) {
    let Ok(handle) = protocol::doc_handle_from_uri(&params.text_document.uri) else {
      return;
    };
    if let Err(err) = self.session.did_close_document(&handle) {
      debug!(uri = %params.text_document.uri, error = %err, "didClose for unknown document");
    }
  }

  async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
    for event in params.changes {
      let Ok(path) = event.uri.to_file_path() else { continue };
      let cancel = self.request_cancel();
      let change = match event.typ {
        FileChangeType::CREATED => crate::features::modules::WatchedChange::Created,
        FileChangeType::DELETED => crate::features::modules::WatchedChange::Deleted,
        _ => crate::features::modules::WatchedChange::Changed,
      };
      let is_dir = self
        .session
        .fs
        .metadata(&path, &cancel)
        .await
        .map(|m| m.is_dir)
        .unwrap_or(false);
      self
        .session
        .modules
        .did_change_watched(&path, change, is_dir, &cancel)
        .await;
    }
  }

  async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
    for folder in params.event.added {
      if let Ok(dir) = protocol::dir_handle_from_uri(&folder.uri) {
        let _ = self.session.enqueue_workspace_dir(&dir);
      }
    }
    for folder in params.event.removed {
      if let Ok(dir) = protocol::dir_handle_from_uri(&folder.uri) {
        let _ = self.session.remove_workspace_dir(&dir);
      }
    }
  }

  async fn completion(&self, params: CompletionParams) -> RpcResult<Option<CompletionResponse>> {
    let position = params.text_document_position;
    let handle = protocol::doc_handle_from_uri(&position.text_document.uri).map_err(invalid_params)?;
    let items = self
      .session
      .decoder
      .completion_for_file(
        &handle.dir,
        &handle.filename,
        Self::doc_position(position.position),
        &self.request_cancel(),
      )
      .await
      .map_err(internal_error)?;

    Ok(Some(CompletionResponse::Array(
      items
        .into_iter()
        .map(|item| CompletionItem {
          label: item.label,
          kind: Some(completion_kind(item.kind)),
          detail: item.detail,
          documentation: item.documentation.map(|doc| {
            Documentation::MarkupContent(MarkupContent {
              kind: MarkupKind::Markdown,
              value: doc,
            })
          }),
          ..Default::default()
        })
        .collect(),
    )))
  }

  async fn completion_resolve(&self, item: CompletionItem) -> RpcResult<CompletionItem> {
    Ok(item)
  }

  async fn hover(&self, params: HoverParams) -> RpcResult<Option<Hover>> {
    let position = params.text_document_position_params;
    let handle = protocol::doc_handle_from_uri(&position.text_document.uri).map_err(invalid_params)?;
    let hover = self
      .session
      .decoder
      .hover_for_file(
        &handle.dir,
        &handle.filename,
        Self::doc_position(position.position),
        &self.request_cancel(),
      )
      .await
      .map_err(internal_error)?;

    Ok(hover.map(|h| Hover {
      contents: HoverContents::Markup(MarkupContent {
        kind: MarkupKind::Markdown,
        value: h.content,
      }),
      range: Some(protocol::range(h.span)),
    }))
  }

  async fn document_symbol(&self, params: DocumentSymbolParams) -> RpcResult<Option<DocumentSymbolResponse>> {
    let handle = protocol::doc_handle_from_uri(&params.text_document.uri).map_err(invalid_params)?;
    let symbols = self
      .session
      .decoder
      .document_symbols_for_file(&handle.dir, &handle.filename, &self.request_cancel())
      .await
      .map_err(internal_error)?;
    Ok(Some(DocumentSymbolResponse::Nested(
      symbols.into_iter().map(document_symbol).collect(),
    )))
  }

  async fn symbol(&self, params: WorkspaceSymbolParams) -> RpcResult<Option<Vec<SymbolInformation>>> {
    let results = self.session.decoder.workspace_symbols(&params.query);
    let mut out = Vec::new();
    for (dir, sym) in results {
      let Some(uri) = protocol::uri_from_doc_handle(&dir.document(&sym.filename)) else {
        continue;
      };
      #[allow(deprecated)]
      out.push(SymbolInformation {
        name: sym.name,
        kind: symbol_kind(sym.kind),
        tags: None,
        deprecated: None,
        location: Location {
          uri,
          range: protocol::range(sym.span),
        },
        container_name: None,
      });
    }
    Ok(Some(out))
  }

  async fn code_lens(&self, params: CodeLensParams) -> RpcResult<Option<Vec<CodeLens>>> {
    let Some(command_id) = self.session.experimental().show_references_command else {
      // Reference count lenses are opt-in via experimental capabilities
      return Ok(None);
    };
    let handle = protocol::doc_handle_from_uri(&params.text_document.uri).map_err(invalid_params)?;
    let lenses = self
      .session
      .decoder
      .code_lenses_for_file(&handle.dir, &handle.filename, &self.request_cancel())
      .await
      .map_err(internal_error)?;

    Ok(Some(
      lenses
        .into_iter()
        .map(|lens| {
          let title = if lens.ref_count == 1 {
            "1 reference".to_string()
          } else {
            format!("{} references", lens.ref_count)
          };
          CodeLens {
            range: protocol::range(lens.span),
            command: Some(Command {
              title,
              command: command_id.clone(),
              arguments: Some(vec![json!({
                "uri": params.text_document.uri,
                "position": protocol::position(lens.span.start),
              })]),
            }),
            data: None,
          }
        })
        .collect(),
    ))
  }

  async fn document_link(&self, params: DocumentLinkParams) -> RpcResult<Option<Vec<DocumentLink>>> {
    let handle = protocol::doc_handle_from_uri(&params.text_document.uri).map_err(invalid_params)?;
    let links = self
      .session
      .decoder
      .document_links_for_file(&handle.dir, &handle.filename, &self.request_cancel())
      .await
      .map_err(internal_error)?;

    Ok(Some(
      links
        .into_iter()
        .map(|link| DocumentLink {
          range: protocol::range(link.span),
          target: Url::parse(&link.target).ok(),
          tooltip: link.tooltip,
          data: None,
        })
        .collect(),
    ))
  }

  async fn semantic_tokens_full(&self, params: SemanticTokensParams) -> RpcResult<Option<SemanticTokensResult>> {
    let legend = self.legend.read().expect("legend lock poisoned").clone();
    if legend.is_empty() {
      return Ok(None);
    }
    let handle = protocol::doc_handle_from_uri(&params.text_document.uri).map_err(invalid_params)?;
    let tokens = self
      .session
      .decoder
      .semantic_tokens_for_file(&handle.dir, &handle.filename, &self.request_cancel())
      .await
      .map_err(internal_error)?;

    let mut data = Vec::new();
    let mut prev_line = 0u32;
    let mut prev_start = 0u32;
    for token in tokens {
      let Some(type_index) = legend.iter().position(|t| *t == token.token_type) else {
        continue;
      };
      let line = token.span.start.line;
      let start = token.span.start.character;
      let length = token.span.end.character.saturating_sub(start);
      let delta_line = line - prev_line;
      let delta_start = if delta_line == 0 { start - prev_start } else { start };
      data.push(SemanticToken {
        delta_line,
        delta_start,
        length,
        token_type: type_index as u32,
        token_modifiers_bitset: 0,
      });
      prev_line = line;
      prev_start = start;
    }

    Ok(Some(SemanticTokensResult::Tokens(SemanticTokens {
      result_id: None,
      data,
    })))
  }

  async fn goto_definition(&self, params: GotoDefinitionParams) -> RpcResult<Option<GotoDefinitionResponse>> {
    let position = params.text_document_position_params;
    let handle = protocol::doc_handle_from_uri(&position.text_document.uri).map_err(invalid_params)?;
    let target = self
      .session
      .decoder
      .definition_for_file(
        &handle.dir,
        &handle.filename,
        Self::doc_position(position.position),
        &self.request_cancel(),
      )
      .await
      .map_err(internal_error)?;

    Ok(target.and_then(|(filename, span)| {
      let uri = protocol::uri_from_doc_handle(&handle.dir.document(&filename))?;
      Some(GotoDefinitionResponse::Scalar(Location {
        uri,
        range: protocol::range(span),
      }))
    }))
  }

  async fn goto_declaration(
    &self,
    params: request::GotoDeclarationParams,
  ) -> RpcResult<Option<request::GotoDeclarationResponse>> {
    self.goto_definition(params).await
  }

  async fn references(&self, params: ReferenceParams) -> RpcResult<Option<Vec<Location>>> {
    let position = params.text_document_position;
    let handle = protocol::doc_handle_from_uri(&position.text_document.uri).map_err(invalid_params)?;
    let refs = self
      .session
      .decoder
      .references_for_file(
        &handle.dir,
        &handle.filename,
        Self::doc_position(position.position),
        &self.request_cancel(),
      )
      .await
      .map_err(internal_error)?;

    Ok(Some(
      refs
        .into_iter()
        .filter_map(|(filename, span)| {
          let uri = protocol::uri_from_doc_handle(&handle.dir.document(&filename))?;
          Some(Location {
            uri,
            range: protocol::range(span),
          })
        })
        .collect(),
    ))
  }

  async fn formatting(&self, params: DocumentFormattingParams) -> RpcResult<Option<Vec<TextEdit>>> {
    let handle = protocol::doc_handle_from_uri(&params.text_document.uri).map_err(invalid_params)?;
    // The session filesystem is the document overlay, so this reads the
    // edited buffer when the document is open and disk otherwise
    let bytes = self
      .session
      .fs
      .read_file(&handle.full_path(), &self.request_cancel())
      .await
      .map_err(internal_error)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let Some(formatted) = decoder::format::format_text(&text) else {
      return Ok(None);
    };

    let line_count = text.matches('\n').count() as u32;
    let last_line = text.rsplit('\n').next().unwrap_or("");
    let end = Position {
      line: line_count,
      character: last_line.encode_utf16().count() as u32,
    };
    Ok(Some(vec![TextEdit {
      range: Range {
        start: Position { line: 0, character: 0 },
        end,
      },
      new_text: formatted,
    }]))
  }

  async fn signature_help(&self, _params: SignatureHelpParams) -> RpcResult<Option<SignatureHelp>> {
    Ok(None)
  }

  async fn code_action(&self, _params: CodeActionParams) -> RpcResult<Option<CodeActionResponse>> {
    Ok(None)
  }

  async fn execute_command(&self, params: ExecuteCommandParams) -> RpcResult<Option<serde_json::Value>> {
    // A client without native suggest triggering sends this through; we
    // fail silently by design
    if params.command == "editor.action.triggerSuggest" {
      return Ok(None);
    }

    match self
      .commands
      .execute(&params.command, &params.arguments, &self.request_cancel())
      .await
    {
      Ok(value) => Ok(Some(value)),
      Err(err @ (CommandError::NotFound(_) | CommandError::Removed)) => {
        let mut rpc = RpcError::method_not_found();
        rpc.message = err.to_string().into();
        Err(rpc)
      }
      Err(err) => Err(internal_error(err)),
    }
  }
}

fn experimental_caps(raw: Option<&serde_json::Value>) -> ExperimentalCaps {
  let Some(serde_json::Value::Object(map)) = raw else {
    return ExperimentalCaps::default();
  };
  ExperimentalCaps {
    show_references_command: map
      .get("showReferencesCommandId")
      .and_then(|v| v.as_str())
      .map(str::to_string),
    refresh_module_providers: map.contains_key("refreshModuleProvidersCommandId"),
    refresh_module_calls: map.contains_key("refreshModuleCallsCommandId"),
    refresh_tool_version: map.contains_key("refreshTerraformVersionCommandId"),
  }
}

/// Runs the server over stdio until the client disconnects or exits.
pub async fn serve_stdio(session: Arc<Session>, changes: tokio::sync::mpsc::UnboundedReceiver<tofuls_store::ChangeEvent>) {
  let stdin = tokio::io::stdin();
  let stdout = tokio::io::stdout();

  let publisher_store = session.store.clone();
  let publisher_cancel = session.cancel.clone();
  let (service, socket) = tower_lsp::LspService::build(move |client| {
    diagnostics::start_publisher(client.clone(), publisher_store.clone(), changes, publisher_cancel.clone());
    Backend::new(client, session.clone())
  })
  .finish();

  tower_lsp::Server::new(stdin, stdout, socket).serve(service).await;
}
