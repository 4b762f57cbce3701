//! Registry HTTP client.
//!
//! Fetches module version lists and per-version metadata from the public
//! registry API. Non-2xx responses surface as [`RegistryError::Client`],
//! which callers cache as negative entries and retry only on the next
//! pipeline enqueue.

use std::{collections::HashMap, time::Duration};

use serde::Deserialize;
use tofuls_syntax::{
  addr::ModuleAddr,
  version::{Version, VersionConstraints},
};
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.opentofu.org";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("registry request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("{status}: {body}")]
  Client { status: u16, body: String },

  #[error("no suitable version found for {addr} {constraints}")]
  NoMatchingVersion { addr: ModuleAddr, constraints: String },
}

impl RegistryError {
  pub fn is_client_error(&self) -> bool {
    matches!(self, RegistryError::Client { .. })
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleResponse {
  #[serde(rename = "id", default)]
  pub version: String,
  #[serde(rename = "variables", default)]
  pub inputs: HashMap<String, Input>,
  #[serde(default)]
  pub outputs: HashMap<String, Output>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Input {
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type", default)]
  pub type_hint: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Output {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ModuleVersionsResponse {
  #[serde(default)]
  versions: Vec<ModuleVersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModuleVersionEntry {
  #[serde(rename = "id", default)]
  version: String,
}

#[derive(Debug, Clone)]
pub struct Client {
  http: reqwest::Client,
  base_url: String,
}

impl Default for Client {
  fn default() -> Self {
    Self::new(DEFAULT_BASE_URL)
  }
}

impl Client {
  pub fn new(base_url: impl Into<String>) -> Self {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .expect("default reqwest client is buildable");
    Self {
      http,
      base_url: base_url.into(),
    }
  }

  /// Known versions of a module, newest first.
  pub async fn module_versions(&self, addr: &ModuleAddr) -> Result<Vec<Version>, RegistryError> {
    let url = format!(
      "{}/registry/docs/modules/{}/{}/{}/index.json",
      self.base_url, addr.namespace, addr.name, addr.target_system
    );
    trace!(%url, "fetching module versions");

    let response = self.http.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RegistryError::Client {
        status: status.as_u16(),
        body,
      });
    }

    let parsed: ModuleVersionsResponse = response.json().await?;
    let mut versions: Vec<Version> = parsed
      .versions
      .iter()
      .filter_map(|entry| entry.version.trim_start_matches('v').parse().ok())
      .collect();
    versions.sort();
    versions.reverse();
    debug!(addr = %addr, count = versions.len(), "module versions fetched");
    Ok(versions)
  }

  /// Newest version satisfying the constraints.
  pub async fn matching_module_version(
    &self,
    addr: &ModuleAddr,
    constraints: &VersionConstraints,
  ) -> Result<Version, RegistryError> {
    let versions = self.module_versions(addr).await?;
    versions
      .into_iter()
      .find(|v| constraints.matches(v))
      .ok_or_else(|| RegistryError::NoMatchingVersion {
        addr: addr.clone(),
        constraints: constraints.to_string(),
      })
  }

  /// Inputs/outputs metadata for the best matching version.
  pub async fn module_data(
    &self,
    addr: &ModuleAddr,
    constraints: &VersionConstraints,
  ) -> Result<(Version, ModuleResponse), RegistryError> {
    let version = self.matching_module_version(addr, constraints).await?;
    let url = format!(
      "{}/registry/docs/modules/{}/{}/{}/v{}/index.json",
      self.base_url, addr.namespace, addr.name, addr.target_system, version
    );
    trace!(%url, "fetching module data");

    let response = self.http.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RegistryError::Client {
        status: status.as_u16(),
        body,
      });
    }

    let data: ModuleResponse = response.json().await?;
    debug!(addr = %addr, %version, inputs = data.inputs.len(), "module data fetched");
    Ok((version, data))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn module_response_decodes_registry_payload() {
    let raw = r#"{
      "id": "5.1.0",
      "published": "2024-01-01T00:00:00Z",
      "variables": {
        "cidr": { "name": "cidr", "type": "string", "description": "VPC CIDR", "required": true }
      },
      "outputs": {
        "vpc_id": { "name": "vpc_id", "description": "The VPC id" }
      }
    }"#;
    let parsed: ModuleResponse = serde_json::from_str(raw).unwrap();
    assert_eq!(parsed.version, "5.1.0");
    assert!(parsed.inputs["cidr"].required);
    assert_eq!(parsed.outputs["vpc_id"].description, "The VPC id");
  }

  #[test]
  fn versions_payload_decodes_and_sorts() {
    let raw = r#"{ "versions": [ { "id": "1.0.0" }, { "id": "2.1.0" }, { "id": "bogus" } ] }"#;
    let parsed: ModuleVersionsResponse = serde_json::from_str(raw).unwrap();
    let mut versions: Vec<Version> = parsed
      .versions
      .iter()
      .filter_map(|e| e.version.parse().ok())
      .collect();
    versions.sort();
    versions.reverse();
    assert_eq!(versions, vec![Version::new(2, 1, 0), Version::new(1, 0, 0)]);
  }
}
