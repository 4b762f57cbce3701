//! Provider schema records.
//!
//! A schema is keyed by provider address, version and source. Sources are
//! a closed set: bundled (preloaded) schemas shipped with the server, or
//! schemas obtained locally for a particular module. Lookup prefers a
//! local schema for the requesting module, then falls back to the newest
//! preloaded version satisfying the constraint.

use std::{collections::HashMap, fmt, sync::Arc};

use tofuls_core::path::DirHandle;
use tofuls_syntax::{
  addr::ProviderAddr,
  schema::ProviderSchema,
  version::{Version, VersionConstraints},
};

use crate::{Inner, StoreError};

/// Where a stored schema came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaSource {
  Preloaded,
  Local { module_path: DirHandle },
}

impl fmt::Display for SchemaSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SchemaSource::Preloaded => f.write_str("preloaded"),
      SchemaSource::Local { module_path } => write!(f, "local({module_path})"),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ProviderSchemaRecord {
  pub addr: ProviderAddr,
  pub version: Version,
  pub source: SchemaSource,
  pub schema: Arc<ProviderSchema>,
}

#[derive(Default, Clone)]
pub(crate) struct SchemaTable {
  pub(crate) records: HashMap<ProviderAddr, Vec<ProviderSchemaRecord>>,
}

/// Facade over the provider schema table.
#[derive(Clone)]
pub struct ProviderSchemaStore {
  inner: Arc<Inner>,
}

impl ProviderSchemaStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  /// Stores a schema; replaces an entry with the same (version, source).
  pub fn add(
    &self,
    addr: ProviderAddr,
    version: Version,
    source: SchemaSource,
    schema: ProviderSchema,
  ) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let records = tables.schemas.records.entry(addr.clone()).or_default();
      records.retain(|r| !(r.version == version && r.source == source));
      records.push(ProviderSchemaRecord {
        addr: addr.clone(),
        version: version.clone(),
        source: source.clone(),
        schema: Arc::new(schema),
      });
      Ok(())
    })
  }

  pub fn has_schema(&self, addr: &ProviderAddr) -> bool {
    self
      .inner
      .snapshot()
      .schemas
      .records
      .get(addr)
      .is_some_and(|v| !v.is_empty())
  }

  /// Best schema for a provider as seen from `module_path`: local beats
  /// preloaded, then the highest version matching the constraints wins.
  pub fn schema_for(
    &self,
    addr: &ProviderAddr,
    constraints: Option<&VersionConstraints>,
    module_path: &DirHandle,
  ) -> Option<ProviderSchemaRecord> {
    let tables = self.inner.snapshot();
    let records = tables.schemas.records.get(addr)?;

    let matches = |r: &ProviderSchemaRecord| match constraints {
      Some(cons) if !cons.is_empty() => cons.matches(&r.version),
      _ => true,
    };

    let local = records
      .iter()
      .filter(|r| matches(r) && r.source == (SchemaSource::Local { module_path: module_path.clone() }))
      .max_by(|a, b| a.version.cmp(&b.version));
    if let Some(record) = local {
      return Some(record.clone());
    }

    records
      .iter()
      .filter(|r| matches(r) && r.source == SchemaSource::Preloaded)
      .max_by(|a, b| a.version.cmp(&b.version))
      .cloned()
      // No version satisfies the constraint: fall back to the newest
      // preloaded schema rather than answering with nothing
      .or_else(|| {
        records
          .iter()
          .filter(|r| r.source == SchemaSource::Preloaded)
          .max_by(|a, b| a.version.cmp(&b.version))
          .cloned()
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;

  fn addr() -> ProviderAddr {
    ProviderAddr::builtin("terraform")
  }

  #[test]
  fn prefers_local_then_highest_preloaded() {
    let (store, _rx) = StateStore::new();
    let schemas = store.provider_schemas();
    let module = DirHandle::from_path("/mod");

    schemas
      .add(addr(), Version::new(1, 0, 0), SchemaSource::Preloaded, ProviderSchema::default())
      .unwrap();
    schemas
      .add(addr(), Version::new(1, 2, 0), SchemaSource::Preloaded, ProviderSchema::default())
      .unwrap();

    let picked = schemas.schema_for(&addr(), None, &module).unwrap();
    assert_eq!(picked.version, Version::new(1, 2, 0));
    assert_eq!(picked.source, SchemaSource::Preloaded);

    schemas
      .add(
        addr(),
        Version::new(1, 1, 0),
        SchemaSource::Local {
          module_path: module.clone(),
        },
        ProviderSchema::default(),
      )
      .unwrap();
    let picked = schemas.schema_for(&addr(), None, &module).unwrap();
    assert_eq!(picked.source, SchemaSource::Local { module_path: module });
  }

  #[test]
  fn constraint_filters_versions() {
    let (store, _rx) = StateStore::new();
    let schemas = store.provider_schemas();
    let module = DirHandle::from_path("/mod");

    schemas
      .add(addr(), Version::new(4, 0, 0), SchemaSource::Preloaded, ProviderSchema::default())
      .unwrap();
    schemas
      .add(addr(), Version::new(5, 1, 0), SchemaSource::Preloaded, ProviderSchema::default())
      .unwrap();

    let cons: VersionConstraints = "~> 4.0".parse().unwrap();
    let picked = schemas.schema_for(&addr(), Some(&cons), &module).unwrap();
    assert_eq!(picked.version, Version::new(4, 0, 0));
  }
}
