//! Registry module metadata cache.
//!
//! Low-priority registry fetches land here. Failed fetches are cached as
//! negative entries so the same miss is not retried until the pipeline
//! enqueues the fetch again.

use std::{collections::HashMap, sync::Arc};

use tofuls_syntax::{
  addr::ModuleAddr,
  version::{Version, VersionConstraints},
};

use crate::{Inner, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryInput {
  pub name: String,
  pub type_hint: String,
  pub description: String,
  pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryOutput {
  pub name: String,
  pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryModuleData {
  pub version: Version,
  pub inputs: Vec<RegistryInput>,
  pub outputs: Vec<RegistryOutput>,
}

#[derive(Debug, Clone)]
pub struct RegistryModuleRecord {
  pub addr: ModuleAddr,
  pub constraints: VersionConstraints,
  pub data: Option<Arc<RegistryModuleData>>,
  /// Set on a failed fetch; the entry acts as a negative cache.
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RegistryKey {
  addr: String,
  constraints: String,
}

impl RegistryKey {
  fn new(addr: &ModuleAddr, constraints: &VersionConstraints) -> Self {
    Self {
      addr: addr.to_string(),
      constraints: constraints.to_string(),
    }
  }
}

#[derive(Default, Clone)]
pub(crate) struct RegistryTable {
  pub(crate) records: HashMap<RegistryKey, RegistryModuleRecord>,
}

/// Facade over the registry metadata table.
#[derive(Clone)]
pub struct RegistryStore {
  inner: Arc<Inner>,
}

impl RegistryStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  pub fn exists(&self, addr: &ModuleAddr, constraints: &VersionConstraints) -> bool {
    self
      .inner
      .snapshot()
      .registry
      .records
      .contains_key(&RegistryKey::new(addr, constraints))
  }

  pub fn record(&self, addr: &ModuleAddr, constraints: &VersionConstraints) -> Option<RegistryModuleRecord> {
    self
      .inner
      .snapshot()
      .registry
      .records
      .get(&RegistryKey::new(addr, constraints))
      .cloned()
  }

  pub fn cache_data(
    &self,
    addr: &ModuleAddr,
    constraints: &VersionConstraints,
    data: RegistryModuleData,
  ) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables.registry.records.insert(
        RegistryKey::new(addr, constraints),
        RegistryModuleRecord {
          addr: addr.clone(),
          constraints: constraints.clone(),
          data: Some(Arc::new(data)),
          error: None,
        },
      );
      Ok(())
    })
  }

  pub fn cache_error(
    &self,
    addr: &ModuleAddr,
    constraints: &VersionConstraints,
    error: String,
  ) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables.registry.records.insert(
        RegistryKey::new(addr, constraints),
        RegistryModuleRecord {
          addr: addr.clone(),
          constraints: constraints.clone(),
          data: None,
          error: Some(error),
        },
      );
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;

  fn sample_addr() -> ModuleAddr {
    ModuleAddr {
      hostname: None,
      namespace: "terraform-aws-modules".into(),
      name: "vpc".into(),
      target_system: "aws".into(),
    }
  }

  #[test]
  fn caches_data_and_errors_separately_by_constraint() {
    let (store, _rx) = StateStore::new();
    let registry = store.registry_modules();
    let addr = sample_addr();
    let v5: VersionConstraints = "~> 5.0".parse().unwrap();
    let v4: VersionConstraints = "~> 4.0".parse().unwrap();

    registry
      .cache_data(
        &addr,
        &v5,
        RegistryModuleData {
          version: Version::new(5, 1, 0),
          inputs: vec![],
          outputs: vec![],
        },
      )
      .unwrap();
    registry.cache_error(&addr, &v4, "404: not found".into()).unwrap();

    assert!(registry.exists(&addr, &v5));
    assert!(registry.record(&addr, &v5).unwrap().data.is_some());
    let negative = registry.record(&addr, &v4).unwrap();
    assert!(negative.data.is_none());
    assert_eq!(negative.error.as_deref(), Some("404: not found"));
  }
}
