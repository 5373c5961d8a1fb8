//! Application Error - What a kiosk, job or API layer gets back
//!
//! Defines [`AppError`] and [`AppResult<T>`].

use std::borrow::Cow;
use std::error::Error;
use std::fmt;

use super::kind::ErrorKind;

type Message = Cow<'static, str>;

/// Error crossing crate boundaries
///
/// Domain crates keep their own `thiserror` enums and convert at the edge.
/// The `hint` is shown to the operator at the kiosk ("Try again later");
/// the `source` only ever reaches the logs.
///
/// ## Examples
/// ```rust
/// use kernel::error::app_error::AppError;
///
/// let err = AppError::too_many_requests("Too many failed pickup attempts")
///     .with_action("Try again later");
/// assert_eq!(err.status_code(), 429);
/// assert!(!err.is_retryable());
/// ```
pub struct AppError {
    kind: ErrorKind,
    message: Message,
    hint: Option<Message>,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

/// `Result<T, AppError>`
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<Message>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Checkout without check-in and similar requests that cannot apply
    pub fn unprocessable(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::UnprocessableEntity, message)
    }

    /// Pickup subject is blocked
    pub fn too_many_requests(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::TooManyRequests, message)
    }

    pub fn internal(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::InternalServerError, message)
    }

    pub fn service_unavailable(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn timeout(message: impl Into<Message>) -> Self {
        Self::new(ErrorKind::RequestTimeout, message)
    }

    /// Attach what the operator should do next
    pub fn with_action(mut self, action: impl Into<Message>) -> Self {
        self.hint = Some(action.into());
        self
    }

    /// Attach the underlying error for the logs
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn action(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// The same request may succeed once storage recovers
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_transient()
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("hint", &self.hint)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{}: {} ({})", self.kind, self.message, hint),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}
