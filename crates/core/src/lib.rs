//! Shared foundation for the language server: the canonical path model,
//! the cancellable read-only filesystem view, open-document records with
//! incremental edits, per-stage operation states, and server settings.
//!
//! Everything here is deliberately free of protocol types; the langserver
//! crate translates to and from LSP structures at its boundary.

pub mod document;
pub mod fsview;
pub mod operation;
pub mod path;
pub mod settings;
