//! Agent identity types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Error;

static LAST_SUFFIX: AtomicI64 = AtomicI64::new(0);

/// Unique identity of one running agent instance.
///
/// The textual form is `<agent-type>@<host>#<suffix>`, where the suffix is a
/// nanosecond timestamp that never repeats within a process. The identity is
/// used both as a routing value and as the name of the instance's exclusive
/// command queue.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentIdentity {
    raw: String,
    type_end: usize,
    host_end: usize,
}

impl AgentIdentity {
    /// Generates a fresh identity for an agent of the given type on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] when either component is empty or
    /// contains one of the `@` / `#` separators.
    pub fn generate(agent_type: &str, host: &str) -> crate::Result<Self> {
        Self::from_parts(agent_type, host, next_suffix())
    }

    fn from_parts(agent_type: &str, host: &str, suffix: i64) -> crate::Result<Self> {
        let raw = format!("{agent_type}@{host}#{suffix}");
        validate_component(&raw, agent_type, "agent type", &['@', '#'])?;
        validate_component(&raw, host, "host", &['#'])?;

        Ok(Self {
            type_end: agent_type.len(),
            host_end: agent_type.len() + 1 + host.len(),
            raw,
        })
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the agent type component.
    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.raw[..self.type_end]
    }

    /// Returns the host component.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.raw[self.type_end + 1..self.host_end]
    }

    /// Returns the `<agent-type>@<host>` class shared by every instance of this
    /// agent type running on the same host.
    #[must_use]
    pub fn host_class(&self) -> &str {
        &self.raw[..self.host_end]
    }
}

fn next_suffix() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut last = LAST_SUFFIX.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_SUFFIX.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

fn validate_component(
    raw: &str,
    component: &str,
    label: &str,
    forbidden: &[char],
) -> crate::Result<()> {
    if component.trim().is_empty() {
        return Err(Error::InvalidIdentity {
            value: raw.into(),
            reason: format!("{label} cannot be empty"),
        });
    }
    if component.contains(forbidden) {
        return Err(Error::InvalidIdentity {
            value: raw.into(),
            reason: format!("{label} cannot contain any of {forbidden:?}"),
        });
    }
    Ok(())
}

/// Best-effort name of the local host.
///
/// Reads `HOSTNAME`, then `/etc/hostname`, and falls back to `localhost`.
#[must_use]
pub fn local_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|host| host.trim().to_owned())
        .filter(|host| !host.is_empty() && !host.contains('#'))
        .unwrap_or_else(|| "localhost".to_owned())
}

impl Display for AgentIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for AgentIdentity {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl FromStr for AgentIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidIdentity {
            value: s.into(),
            reason: reason.into(),
        };
        let (class, suffix) = s
            .rsplit_once('#')
            .ok_or_else(|| invalid("missing `#` suffix separator"))?;
        let (agent_type, host) = class
            .split_once('@')
            .ok_or_else(|| invalid("missing `@` host separator"))?;
        let suffix = suffix
            .parse::<i64>()
            .map_err(|_| invalid("suffix must be an integer"))?;
        Self::from_parts(agent_type, host, suffix)
    }
}

impl TryFrom<String> for AgentIdentity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgentIdentity> for String {
    fn from(value: AgentIdentity) -> Self {
        value.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_exposes_components() {
        let id = AgentIdentity::generate("agent-git", "build-01").unwrap();

        assert_eq!(id.agent_type(), "agent-git");
        assert_eq!(id.host(), "build-01");
        assert_eq!(id.host_class(), "agent-git@build-01");
        assert!(id.as_str().starts_with("agent-git@build-01#"));
    }

    #[test]
    fn suffixes_never_repeat() {
        let a = AgentIdentity::generate("agent", "host").unwrap();
        let b = AgentIdentity::generate("agent", "host").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trip_identity() {
        let id = AgentIdentity::generate("pong", "localhost").unwrap();
        let parsed = id.to_string().parse::<AgentIdentity>().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_separators_in_components() {
        assert!(AgentIdentity::generate("a@b", "host").is_err());
        assert!(AgentIdentity::generate("agent", "ho#st").is_err());
        assert!(AgentIdentity::generate(" ", "host").is_err());
        assert!("no-separators".parse::<AgentIdentity>().is_err());
    }
}
