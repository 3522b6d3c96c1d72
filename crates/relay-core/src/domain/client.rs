//! Client identity types.

use std::borrow::Borrow;
use std::fmt;

use uuid::Uuid;

use crate::domain::registry::RegisterError;

// ── ClientName ────────────────────────────────────────────────────────────────

/// The name a client registers under, taken from `?name=` on connect.
///
/// Always non-empty.  Names are compared exactly (case-sensitive, no
/// trimming), matching how receivers are written in messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientName(String);

impl ClientName {
    /// Validates a requested name.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NameRequired`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, RegisterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegisterError::NameRequired);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets the registry be queried with a plain `&str` receiver name.
impl Borrow<str> for ClientName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── ConnectionId ──────────────────────────────────────────────────────────────

/// Identity of one live connection, independent of its name.
///
/// Two connections that asked for the same name still have different ids,
/// which is what lets a rejected duplicate close without evicting the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight hex digits are plenty to tell sessions apart in logs.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

// ── HardwareAlias ─────────────────────────────────────────────────────────────

/// A reserved receiver name that maps to a serial board instead of a client.
///
/// Aliases are resolved before any registry lookup, so a message addressed
/// to `"bulbs"` never produces a "receiver not found" error even though no
/// client is registered under that name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareAlias {
    /// The lighting board (`"bulbs"`), write-only.
    Bulbs,
    /// The button/lever board (`"input-board"`), read and write.
    InputBoard,
}

impl HardwareAlias {
    pub const ALL: [HardwareAlias; 2] = [HardwareAlias::Bulbs, HardwareAlias::InputBoard];

    /// Resolves a receiver name to an alias, if it is one.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bulbs" => Some(HardwareAlias::Bulbs),
            "input-board" => Some(HardwareAlias::InputBoard),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HardwareAlias::Bulbs => "bulbs",
            HardwareAlias::InputBoard => "input-board",
        }
    }
}

impl fmt::Display for HardwareAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name_rejects_empty() {
        assert_eq!(ClientName::new(""), Err(RegisterError::NameRequired));
    }

    #[test]
    fn test_client_name_keeps_text_verbatim() {
        let name = ClientName::new(" Score ").unwrap();
        assert_eq!(name.as_str(), " Score ");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_alias_names_round_trip() {
        for alias in HardwareAlias::ALL {
            assert_eq!(HardwareAlias::from_name(alias.as_str()), Some(alias));
        }
    }

    #[test]
    fn test_ordinary_name_is_not_an_alias() {
        assert_eq!(HardwareAlias::from_name("score"), None);
        assert_eq!(HardwareAlias::from_name("Bulbs"), None);
    }
}
