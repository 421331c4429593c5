//! Authenticated session identity for the engine.
//!
//! The viewer and bearer token are injected explicitly at construction
//! instead of being read from an ambient global, so tests can run many
//! independent sessions in one process. The token is interior-mutable
//! because the platform refreshes it out-of-band.

use parking_lot::RwLock;

use aerochat_proto::model::{ChatUser, UserId};

/// Identity and credentials for one logged-in user.
///
/// Cheap to share: clone the `Arc` it is typically wrapped in, not the
/// session itself.
pub struct Session {
    user: ChatUser,
    token: RwLock<String>,
}

impl Session {
    /// Creates a session for the given user with an initial bearer token.
    pub fn new(user: ChatUser, token: impl Into<String>) -> Self {
        Self {
            user,
            token: RwLock::new(token.into()),
        }
    }

    /// The logged-in user.
    #[must_use]
    pub fn user(&self) -> &ChatUser {
        &self.user
    }

    /// The logged-in user's identifier.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// A snapshot of the current bearer token.
    #[must_use]
    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    /// Replaces the bearer token after an out-of-band refresh.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Token is redacted.
        f.debug_struct("Session")
            .field("user", &self.user.id)
            .finish_non_exhaustive()
    }
}
