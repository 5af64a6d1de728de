//! # Actor Identity
//!
//! The identity on whose behalf a command runs. Handlers build an [`Actor`]
//! from the authenticated caller and pass it down explicitly; domain code
//! stamps `created_by` / `modified_by` from it.

use serde::{Deserialize, Serialize};

/// Username recorded for scheduled and automatic transitions.
pub const SYSTEM_ACTOR: &str = "SISTEMA";

/// The user performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Login name of the user.
    pub username: String,
    /// Identity document of the personnel record linked to the user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl Actor {
    /// Create an actor with no linked personnel document.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            document: None,
        }
    }

    /// Attach the personnel document of the acting user.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// The actor used by background sweeps.
    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR)
    }

    /// Whether this is the background system actor.
    pub fn is_system(&self) -> bool {
        self.username == SYSTEM_ACTOR
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.username)
    }
}
