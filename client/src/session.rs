//! Session context passed into every engine operation.

/// Identity and connectivity as seen by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Bearer token, if the user is signed in
    pub token: Option<String>,
    /// Whether the network is reachable
    pub connected: bool,
}

impl Session {
    pub fn new(token: Option<String>, connected: bool) -> Self {
        Self { token, connected }
    }

    /// A signed-in, connected session.
    pub fn online(token: impl Into<String>) -> Self {
        Self::new(Some(token.into()), true)
    }

    /// A session without connectivity.
    pub fn offline(token: Option<String>) -> Self {
        Self::new(token, false)
    }

    /// The token, ignoring blank values.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.trim().is_empty())
    }

    /// The token if the server can be reached with it.
    pub fn online_token(&self) -> Option<&str> {
        if self.connected {
            self.token()
        } else {
            None
        }
    }
}
