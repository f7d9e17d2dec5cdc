//! Credential handling.
//!
//! Secrets are held in a buffer that is zeroed on drop and never shows up in
//! `Debug` or `Display` output.

use crate::error::ConnectionError;
use crate::options::{OptionKey, OptionRegistry};
use std::fmt;
use std::sync::Arc;

/// Authentication material presented to the transport.
#[derive(Clone)]
pub enum Credentials {
    /// No authentication
    Anonymous,
    /// Username and password
    Basic {
        username: String,
        password: Arc<SecureString>,
    },
    /// Opaque bearer token
    Token(Arc<SecureString>),
}

impl Credentials {
    /// No authentication.
    pub fn none() -> Self {
        Credentials::Anonymous
    }

    /// Username and password credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: Arc::new(SecureString::new(password.into())),
        }
    }

    /// Bearer token credentials. A leading `Bearer ` is accepted and stripped.
    pub fn token(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = match token.strip_prefix("Bearer ") {
            Some(stripped) => stripped.trim().to_string(),
            None => token,
        };
        Credentials::Token(Arc::new(SecureString::new(token)))
    }

    /// Build credentials from the connection options.
    ///
    /// A token takes precedence over username/password. A password without a
    /// username is rejected.
    pub fn from_options(options: &OptionRegistry) -> Result<Self, ConnectionError> {
        if let Some(token) = options.get(OptionKey::AuthToken) {
            if token.trim().is_empty() {
                return Err(ConnectionError::InvalidParameter {
                    parameter: OptionKey::AuthToken.to_string(),
                    message: "Token cannot be empty".to_string(),
                });
            }
            return Ok(Self::token(token));
        }

        match (options.get(OptionKey::Username), options.get(OptionKey::Password)) {
            (Some(username), password) if !username.is_empty() => {
                Ok(Self::basic(username, password.unwrap_or_default()))
            }
            (_, Some(_)) => Err(ConnectionError::InvalidParameter {
                parameter: OptionKey::Username.to_string(),
                message: "Username is required when a password is set".to_string(),
            }),
            _ => Ok(Self::none()),
        }
    }

    /// Get the username, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Basic { username, .. } => Some(username),
            _ => None,
        }
    }

    /// Get the password. Only transports should call this.
    pub fn password(&self) -> Option<&str> {
        match self {
            Credentials::Basic { password, .. } => Some(password.as_str()),
            _ => None,
        }
    }

    /// Get the bearer token without the `Bearer ` prefix.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Credentials::Token(token) => Some(token.as_str()),
            _ => None,
        }
    }

    /// Value of an HTTP `authorization` header for these credentials.
    pub fn authorization_header(&self) -> Option<String> {
        self.bearer_token().map(|token| format!("Bearer {}", token))
    }

    /// Whether no authentication material is present.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credentials::Anonymous)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Credentials::Anonymous"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Credentials::Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token(_) => f
                .debug_tuple("Credentials::Token")
                .field(&"<redacted>")
                .finish(),
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "anonymous"),
            Credentials::Basic { username, .. } => write!(f, "user {}", username),
            Credentials::Token(_) => write!(f, "bearer token"),
        }
    }
}

/// String that zeros its memory on drop and never displays its contents.
pub struct SecureString {
    data: Vec<u8>,
}

impl SecureString {
    fn new(s: String) -> Self {
        Self {
            data: s.into_bytes(),
        }
    }

    fn as_str(&self) -> &str {
        // Built from a String, so always valid UTF-8
        std::str::from_utf8(&self.data).unwrap_or_default()
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        for byte in &mut self.data {
            *byte = 0;
        }
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(<redacted>)")
    }
}
