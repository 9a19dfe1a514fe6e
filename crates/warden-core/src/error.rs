//! Error taxonomy for the Warden authentication core

use thiserror::Error;

/// Broad classification used by callers (HTTP adapters, audit logging) to
/// pick status codes without matching on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Errors produced by authentication clients, sync hooks, and the token
/// refresh manager. `Clone` is required so coalesced refresh waiters can all
/// receive the same outcome.
#[derive(Error, Debug, Clone)]
pub enum AuthnError {
    #[error("no authentication client matched the request")]
    ClientNotFound,

    #[error("identity not found: {message}")]
    IdentityNotFound { message: String },

    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("too many consecutive incorrect login attempts")]
    TooManyAttempts,

    #[error("user is disabled")]
    UserDisabled,

    #[error("missing or empty OAuth state cookie")]
    MissingState,

    #[error("OAuth state did not match the value in the state cookie")]
    StateMismatch,

    #[error("missing PKCE code verifier cookie")]
    MissingPkceVerifier,

    #[error("missing required attribute: {attribute}")]
    MissingAttribute { attribute: String },

    #[error("email address is not allowed: {email}")]
    EmailNotAllowed { email: String },

    #[error("session token needs rotation before it can be used")]
    TokenNeedsRotation,

    #[error("invalid session token: {message}")]
    InvalidSessionToken { message: String },

    #[error("invalid token: {message}")]
    InvalidToken { message: String },

    #[error("no refresh token found")]
    NoRefreshToken,

    #[error("exhausted retries acquiring the token refresh lock")]
    RetriesExhausted,

    #[error("access token could not be refreshed")]
    ExpiredAccessToken,

    #[error("sign-up is not allowed for this authentication module")]
    SignUpNotAllowed,

    #[error("cannot remove the last organization admin")]
    LastOrgAdmin,

    #[error("quota reached for scope {scope}")]
    QuotaReached { scope: String },

    #[error("namespace mismatch: access token claims {access}, id token claims {id}")]
    NamespaceMismatch { access: String, id: String },

    #[error("unexpected identity type: {id_type}")]
    UnexpectedIdentityType { id_type: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("operation canceled")]
    Canceled,

    #[error("OAuth provider error: {message}")]
    Provider { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AuthnError {
    pub fn identity_not_found(message: impl Into<String>) -> Self {
        Self::IdentityNotFound {
            message: message.into(),
        }
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    pub fn invalid_session_token(message: impl Into<String>) -> Self {
        Self::InvalidSessionToken {
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    pub fn missing_attribute(attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            attribute: attribute.into(),
        }
    }

    pub fn email_not_allowed(email: impl Into<String>) -> Self {
        Self::EmailNotAllowed {
            email: email.into(),
        }
    }

    pub fn quota_reached(scope: impl Into<String>) -> Self {
        Self::QuotaReached {
            scope: scope.into(),
        }
    }

    pub fn unexpected_identity_type(id_type: impl Into<String>) -> Self {
        Self::UnexpectedIdentityType {
            id_type: id_type.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClientNotFound | Self::IdentityNotFound { .. } => ErrorKind::NotFound,

            Self::InvalidCredentials { .. }
            | Self::TooManyAttempts
            | Self::UserDisabled
            | Self::MissingState
            | Self::StateMismatch
            | Self::MissingPkceVerifier
            | Self::MissingAttribute { .. }
            | Self::TokenNeedsRotation
            | Self::InvalidSessionToken { .. }
            | Self::InvalidToken { .. }
            | Self::NoRefreshToken
            | Self::ExpiredAccessToken
            | Self::NamespaceMismatch { .. } => ErrorKind::Unauthorized,

            Self::EmailNotAllowed { .. }
            | Self::SignUpNotAllowed
            | Self::LastOrgAdmin
            | Self::QuotaReached { .. }
            | Self::Forbidden { .. } => ErrorKind::Forbidden,

            Self::UnexpectedIdentityType { .. } | Self::BadRequest { .. } => ErrorKind::BadRequest,

            Self::RetriesExhausted
            | Self::Canceled
            | Self::Provider { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Sanitized message safe to return to the caller. Login-path failures
    /// all collapse to one phrase so responses never reveal whether a
    /// username exists or which backend rejected it.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::IdentityNotFound { .. }
            | Self::InvalidCredentials { .. }
            | Self::TooManyAttempts
            | Self::UserDisabled => "invalid username or password",
            Self::EmailNotAllowed { .. } => "email address is not allowed",
            Self::SignUpNotAllowed => "sign-up is not allowed",
            Self::QuotaReached { .. } => "quota reached",
            _ => match self.kind() {
                ErrorKind::NotFound => "not found",
                ErrorKind::Unauthorized => "unauthorized",
                ErrorKind::Forbidden => "forbidden",
                ErrorKind::BadRequest => "bad request",
                ErrorKind::Internal => "an internal error occurred",
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthnError>;
