//! Provider and module source addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_REGISTRY_HOST: &str = "registry.opentofu.org";
pub const DEFAULT_PROVIDER_NAMESPACE: &str = "hashicorp";
pub const BUILTIN_PROVIDER_NAMESPACE: &str = "builtin";

/// Fully-qualified provider address, e.g.
/// `registry.opentofu.org/integrations/github`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderAddr {
  pub hostname: String,
  pub namespace: String,
  pub type_name: String,
}

impl ProviderAddr {
  pub fn builtin(type_name: impl Into<String>) -> Self {
    Self {
      hostname: DEFAULT_REGISTRY_HOST.into(),
      namespace: BUILTIN_PROVIDER_NAMESPACE.into(),
      type_name: type_name.into(),
    }
  }

  /// Parses a `source` string from `required_providers`. One segment
  /// implies the default namespace, two the default registry host.
  pub fn parse(source: &str) -> Option<Self> {
    let parts: Vec<&str> = source.split('/').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
      [type_name] => Some(Self {
        hostname: DEFAULT_REGISTRY_HOST.into(),
        namespace: DEFAULT_PROVIDER_NAMESPACE.into(),
        type_name: (*type_name).into(),
      }),
      [namespace, type_name] => Some(Self {
        hostname: DEFAULT_REGISTRY_HOST.into(),
        namespace: (*namespace).into(),
        type_name: (*type_name).into(),
      }),
      [hostname, namespace, type_name] => Some(Self {
        hostname: (*hostname).into(),
        namespace: (*namespace).into(),
        type_name: (*type_name).into(),
      }),
      _ => None,
    }
  }

  /// The provider implied by a resource or data source type name:
  /// the prefix before the first underscore. `terraform_remote_state`
  /// maps to the builtin `terraform` provider.
  pub fn implied_by_resource_type(type_name: &str) -> Self {
    let local = type_name.split('_').next().unwrap_or(type_name);
    Self::implied_by_local_name(local)
  }

  pub fn implied_by_local_name(local: &str) -> Self {
    if local == "terraform" {
      return Self::builtin("terraform");
    }
    Self {
      hostname: DEFAULT_REGISTRY_HOST.into(),
      namespace: DEFAULT_PROVIDER_NAMESPACE.into(),
      type_name: local.into(),
    }
  }
}

impl fmt::Display for ProviderAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
  }
}

/// A provider reference inside a module: local name plus optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderRef {
  pub local_name: String,
  pub alias: Option<String>,
}

/// Registry module address, e.g. `terraform-aws-modules/vpc/aws`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleAddr {
  pub hostname: Option<String>,
  pub namespace: String,
  pub name: String,
  pub target_system: String,
}

impl fmt::Display for ModuleAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(host) = &self.hostname {
      write!(f, "{host}/")?;
    }
    write!(f, "{}/{}/{}", self.namespace, self.name, self.target_system)
  }
}

/// Where a declared module call points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleSourceAddr {
  /// `./modules/net` or `../shared`
  Local(String),
  /// `namespace/name/target_system`, optionally host-prefixed
  Registry(ModuleAddr),
  /// Anything else: git, http, s3 and friends
  Remote(String),
}

impl ModuleSourceAddr {
  pub fn parse(source: &str) -> Self {
    if source.starts_with("./") || source.starts_with("../") || source.starts_with(".\\") || source.starts_with("..\\")
    {
      return ModuleSourceAddr::Local(source.to_string());
    }
    if let Some(addr) = Self::parse_registry(source) {
      return ModuleSourceAddr::Registry(addr);
    }
    ModuleSourceAddr::Remote(source.to_string())
  }

  fn parse_registry(source: &str) -> Option<ModuleAddr> {
    let parts: Vec<&str> = source.split('/').collect();
    let (hostname, rest) = match parts.as_slice() {
      [ns, name, target] => (None, [*ns, *name, *target]),
      [host, ns, name, target] if host.contains('.') => (Some((*host).to_string()), [*ns, *name, *target]),
      _ => return None,
    };
    if !rest.iter().all(|p| is_registry_part(p)) {
      return None;
    }
    Some(ModuleAddr {
      hostname,
      namespace: rest[0].into(),
      name: rest[1].into(),
      target_system: rest[2].into(),
    })
  }
}

impl fmt::Display for ModuleSourceAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModuleSourceAddr::Local(s) | ModuleSourceAddr::Remote(s) => f.write_str(s),
      ModuleSourceAddr::Registry(addr) => addr.fmt(f),
    }
  }
}

fn is_registry_part(part: &str) -> bool {
  !part.is_empty()
    && part
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
