//! Version and version-constraint model.
//!
//! Constraint syntax follows the configuration language, not semver:
//! comma-separated clauses of `=`, `!=`, `>`, `>=`, `<`, `<=` and the
//! pessimistic operator `~>` whose upper bound depends on how many
//! segments were written (`~> 1.2` allows 1.x, `~> 1.2.3` allows 1.2.x).

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
  #[error("invalid version {0:?}")]
  InvalidVersion(String),

  #[error("invalid version constraint {0:?}")]
  InvalidConstraint(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
  pub major: u64,
  pub minor: u64,
  pub patch: u64,
  pub pre: Option<String>,
}

impl Version {
  pub fn new(major: u64, minor: u64, patch: u64) -> Self {
    Self {
      major,
      minor,
      patch,
      pre: None,
    }
  }
}

impl FromStr for Version {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let invalid = || VersionError::InvalidVersion(s.to_string());
    let (core, pre) = match s.split_once('-') {
      Some((core, pre)) => (core, Some(pre.to_string())),
      None => (s, None),
    };
    let mut parts = core.split('.');
    let major = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
    let minor = parts.next().map(|p| p.parse()).transpose().map_err(|_| invalid())?.unwrap_or(0);
    let patch = parts.next().map(|p| p.parse()).transpose().map_err(|_| invalid())?.unwrap_or(0);
    if parts.next().is_some() {
      return Err(invalid());
    }
    Ok(Version {
      major,
      minor,
      patch,
      pre,
    })
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
    if let Some(pre) = &self.pre {
      write!(f, "-{pre}")?;
    }
    Ok(())
  }
}

impl Ord for Version {
  fn cmp(&self, other: &Self) -> Ordering {
    (self.major, self.minor, self.patch)
      .cmp(&(other.major, other.minor, other.patch))
      // A pre-release sorts before the same release
      .then_with(|| match (&self.pre, &other.pre) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
      })
  }
}

impl PartialOrd for Version {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
  Eq,
  Neq,
  Gt,
  Gte,
  Lt,
  Lte,
  Pessimistic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
  pub op: ConstraintOp,
  pub version: Version,
  /// Number of version segments written in the source; drives the
  /// pessimistic operator's upper bound.
  pub segments: usize,
}

impl Constraint {
  pub fn matches(&self, v: &Version) -> bool {
    match self.op {
      ConstraintOp::Eq => *v == self.version,
      ConstraintOp::Neq => *v != self.version,
      ConstraintOp::Gt => *v > self.version,
      ConstraintOp::Gte => *v >= self.version,
      ConstraintOp::Lt => *v < self.version,
      ConstraintOp::Lte => *v <= self.version,
      ConstraintOp::Pessimistic => {
        if *v < self.version {
          return false;
        }
        if self.segments <= 2 {
          v.major == self.version.major
        } else {
          v.major == self.version.major && v.minor == self.version.minor
        }
      }
    }
  }
}

impl fmt::Display for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self.op {
      ConstraintOp::Eq => "",
      ConstraintOp::Neq => "!= ",
      ConstraintOp::Gt => "> ",
      ConstraintOp::Gte => ">= ",
      ConstraintOp::Lt => "< ",
      ConstraintOp::Lte => "<= ",
      ConstraintOp::Pessimistic => "~> ",
    };
    write!(f, "{op}{}", self.version)
  }
}

/// A comma-separated conjunction of constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionConstraints(pub Vec<Constraint>);

impl VersionConstraints {
  pub fn matches(&self, v: &Version) -> bool {
    self.0.iter().all(|c| c.matches(v))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromStr for VersionConstraints {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut constraints = Vec::new();
    for clause in s.split(',') {
      let clause = clause.trim();
      if clause.is_empty() {
        continue;
      }
      constraints.push(parse_clause(clause)?);
    }
    Ok(VersionConstraints(constraints))
  }
}

impl fmt::Display for VersionConstraints {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let clauses: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
    f.write_str(&clauses.join(", "))
  }
}

fn parse_clause(clause: &str) -> Result<Constraint, VersionError> {
  let invalid = || VersionError::InvalidConstraint(clause.to_string());
  let (op, rest) = if let Some(rest) = clause.strip_prefix("~>") {
    (ConstraintOp::Pessimistic, rest)
  } else if let Some(rest) = clause.strip_prefix(">=") {
    (ConstraintOp::Gte, rest)
  } else if let Some(rest) = clause.strip_prefix("<=") {
    (ConstraintOp::Lte, rest)
  } else if let Some(rest) = clause.strip_prefix("!=") {
    (ConstraintOp::Neq, rest)
  } else if let Some(rest) = clause.strip_prefix('>') {
    (ConstraintOp::Gt, rest)
  } else if let Some(rest) = clause.strip_prefix('<') {
    (ConstraintOp::Lt, rest)
  } else if let Some(rest) = clause.strip_prefix('=') {
    (ConstraintOp::Eq, rest)
  } else {
    (ConstraintOp::Eq, clause)
  };
  let raw = rest.trim();
  let segments = raw.split('-').next().unwrap_or(raw).split('.').count();
  let version = raw.parse().map_err(|_| invalid())?;
  Ok(Constraint { op, version, segments })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(s: &str) -> Version {
    s.parse().unwrap()
  }

  fn c(s: &str) -> VersionConstraints {
    s.parse().unwrap()
  }

  #[test]
  fn version_parse_and_order() {
    assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
    assert_eq!(v("1.2"), Version::new(1, 2, 0));
    assert!(v("1.10.0") > v("1.9.9"));
    assert!(v("1.0.0-beta1") < v("1.0.0"));
  }

  #[test]
  fn pessimistic_two_segments() {
    let cons = c("~> 1.2");
    assert!(cons.matches(&v("1.2.0")));
    assert!(cons.matches(&v("1.9.0")));
    assert!(!cons.matches(&v("2.0.0")));
    assert!(!cons.matches(&v("1.1.0")));
  }

  #[test]
  fn pessimistic_three_segments() {
    let cons = c("~> 1.2.3");
    assert!(cons.matches(&v("1.2.3")));
    assert!(cons.matches(&v("1.2.9")));
    assert!(!cons.matches(&v("1.3.0")));
  }

  #[test]
  fn conjunction() {
    let cons = c(">= 1.2, < 2.0");
    assert!(cons.matches(&v("1.5.0")));
    assert!(!cons.matches(&v("2.0.0")));
    assert!(!cons.matches(&v("1.1.0")));
  }

  #[test]
  fn bare_version_is_exact() {
    let cons = c("5.1.0");
    assert!(cons.matches(&v("5.1.0")));
    assert!(!cons.matches(&v("5.1.1")));
  }

  #[test]
  fn display_round_trips() {
    for s in [">= 1.2.0", "~> 3.0.0", "!= 1.0.0, < 2.0.0"] {
      assert_eq!(c(s).to_string(), s);
    }
  }
}
