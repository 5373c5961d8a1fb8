//! Error Kind - How an outer layer should treat a failure

use serde::Serialize;

/// Error classification
///
/// Every kind has a conventional HTTP status so that a kiosk API can map
/// errors without knowing the domain enums.
///
/// ```rust
/// use kernel::error::kind::ErrorKind;
///
/// assert_eq!(ErrorKind::TooManyRequests.status_code(), 429);
/// assert!(ErrorKind::TooManyRequests.is_rejection());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed input
    BadRequest,
    /// Record does not exist
    NotFound,
    /// Storage did not answer in time
    RequestTimeout,
    /// Conflicts with current state
    Conflict,
    /// Well-formed but not applicable, e.g. checkout without check-in
    UnprocessableEntity,
    /// Pickup subject is blocked
    TooManyRequests,
    /// Bug, misuse or inconsistent storage
    InternalServerError,
    /// Storage or pool temporarily unavailable
    ServiceUnavailable,
}

impl ErrorKind {
    const fn parts(&self) -> (u16, &'static str) {
        match self {
            ErrorKind::BadRequest => (400, "Bad Request"),
            ErrorKind::NotFound => (404, "Not Found"),
            ErrorKind::RequestTimeout => (408, "Request Timeout"),
            ErrorKind::Conflict => (409, "Conflict"),
            ErrorKind::UnprocessableEntity => (422, "Unprocessable Entity"),
            ErrorKind::TooManyRequests => (429, "Too Many Requests"),
            ErrorKind::InternalServerError => (500, "Internal Server Error"),
            ErrorKind::ServiceUnavailable => (503, "Service Unavailable"),
        }
    }

    #[inline]
    pub const fn status_code(&self) -> u16 {
        self.parts().0
    }

    /// Standard reason phrase
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        self.parts().1
    }

    /// Should be logged at error level and alerted on
    #[inline]
    pub const fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// A deliberate refusal. Presented to the user, never retried automatically.
    #[inline]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            ErrorKind::TooManyRequests | ErrorKind::UnprocessableEntity | ErrorKind::NotFound
        )
    }

    #[inline]
    pub const fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::RequestTimeout | ErrorKind::ServiceUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pickup_block_is_rejection() {
        let kind = ErrorKind::TooManyRequests;
        assert_eq!(kind.status_code(), 429);
        assert!(kind.is_rejection());
        assert!(!kind.is_server_error());
        assert!(!kind.is_transient());
    }

    #[test]
    fn test_storage_failures() {
        assert!(ErrorKind::ServiceUnavailable.is_server_error());
        assert!(ErrorKind::ServiceUnavailable.is_transient());
        assert!(ErrorKind::RequestTimeout.is_transient());
        assert!(!ErrorKind::InternalServerError.is_transient());
        assert!(!ErrorKind::InternalServerError.is_rejection());
    }

    #[test]
    fn test_display_and_serialize() {
        assert_eq!(ErrorKind::UnprocessableEntity.to_string(), "Unprocessable Entity");
        let json = serde_json::to_string(&ErrorKind::TooManyRequests).unwrap();
        assert_eq!(json, "\"TOO_MANY_REQUESTS\"");
    }
}
