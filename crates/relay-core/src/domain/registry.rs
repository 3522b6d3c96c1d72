//! ClientRegistry: the name → connection map.
//!
//! The registry is the single source of truth for named routing targets.  It
//! enforces the uniqueness invariant: at any instant at most one live
//! connection owns a given name.  A second connect under a taken name is
//! rejected; it never replaces the existing entry.
//!
//! # Ownership
//!
//! Each entry records the [`ConnectionId`] of its owner.  [`unregister`]
//! only removes an entry when the ids match, so the close event of a
//! rejected duplicate cannot remove the connection that legitimately holds
//! the name.
//!
//! [`unregister`]: ClientRegistry::unregister

use std::collections::HashMap;

use thiserror::Error;
use tracing::info;

use crate::domain::client::{ClientName, ConnectionId, HardwareAlias};

/// Reasons a connect attempt can be refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// Another live connection already owns the name, or the name is a
    /// reserved hardware alias.
    #[error("name already in use: {0}")]
    NameInUse(String),

    /// The connection did not supply a name.
    #[error("name is required")]
    NameRequired,
}

/// A registered connection handle.
#[derive(Debug)]
pub struct RegisteredClient<S> {
    pub id: ConnectionId,
    pub sink: S,
}

/// In-memory registry of all named connections.
///
/// `S` is the transport's outbound handle (a WebSocket writer channel, an
/// in-process queue, a test double).  The registry never calls into it.
#[derive(Debug)]
pub struct ClientRegistry<S> {
    clients: HashMap<ClientName, RegisteredClient<S>>,
}

impl<S> Default for ClientRegistry<S> {
    fn default() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }
}

impl<S> ClientRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NameInUse`] if the name is owned by another
    /// connection or is a hardware alias.  The registry is unchanged.
    pub fn register(
        &mut self,
        name: ClientName,
        id: ConnectionId,
        sink: S,
    ) -> Result<(), RegisterError> {
        self.check_available(&name)?;
        info!("connected: {name} ({id})");
        self.clients.insert(name, RegisteredClient { id, sink });
        Ok(())
    }

    /// Checks that `name` could be registered right now.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::NameInUse`] under the same conditions as
    /// [`register`](Self::register).
    pub fn check_available(&self, name: &ClientName) -> Result<(), RegisterError> {
        if HardwareAlias::from_name(name.as_str()).is_some() || self.clients.contains_key(name) {
            return Err(RegisterError::NameInUse(name.to_string()));
        }
        Ok(())
    }

    /// Removes `name` if it is owned by `id`.  Returns whether an entry was
    /// removed.
    pub fn unregister(&mut self, name: &str, id: ConnectionId) -> bool {
        match self.clients.get(name) {
            Some(entry) if entry.id == id => {
                self.clients.remove(name);
                info!("disconnected: {name} ({id})");
                true
            }
            _ => false,
        }
    }

    /// Returns the connection registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<&RegisteredClient<S>> {
        self.clients.get(name)
    }

    /// Returns `true` if `name` is currently owned by connection `id`.
    pub fn is_owner(&self, name: &str, id: ConnectionId) -> bool {
        self.lookup(name).is_some_and(|entry| entry.id == id)
    }

    /// Iterates over every registered connection.  Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientName, &RegisteredClient<S>)> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
