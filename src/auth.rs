//! Bearer token check for the HTTP daemon.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,

    #[error("invalid bearer token")]
    Invalid,
}

/// Holds the token the daemon expects, if any.
#[derive(Clone, Default)]
pub struct TokenGuard {
    expected: Option<String>,
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.expected.is_some() { "[REDACTED]" } else { "none" };
        write!(f, "TokenGuard {{ expected: {state} }}")
    }
}

impl TokenGuard {
    /// A guard with no token lets every request through.
    pub fn new(expected: Option<String>) -> Self {
        Self {
            expected: expected.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Check an `Authorization` header value.
    pub fn check(&self, header: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = self.expected.as_deref() else {
            return Ok(());
        };
        let provided = header.and_then(bearer_token).ok_or(AuthError::Missing)?;
        if tokens_match(provided, expected) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

/// Constant-time comparison; the loop always runs over the longer input.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let a = provided.as_bytes();
    let b = expected.as_bytes();
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let mut diff = u8::from(a.len() != b.len());
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Token from a `Bearer <token>` header. The scheme is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let scheme = header.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    Some(header[7..].trim()).filter(|t| !t.is_empty())
}
