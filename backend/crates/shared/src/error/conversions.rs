//! Conversions into [`AppError`] and SQLSTATE helpers

use super::app_error::AppError;

impl From<crate::id::IdParseError> for AppError {
    fn from(err: crate::id::IdParseError) -> Self {
        AppError::bad_request("Invalid identifier").with_source(err)
    }
}

/// SQLSTATE of a database error, if the server reported one
#[cfg(feature = "sqlx")]
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// `23505 unique_violation`
#[cfg(feature = "sqlx")]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some("23505")
}

/// Serialization failure or deadlock; the whole transaction may be replayed
#[cfg(feature = "sqlx")]
pub fn is_transaction_rollback(err: &sqlx::Error) -> bool {
    matches!(sqlstate(err).as_deref(), Some("40001" | "40P01"))
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let app_err = match &err {
            sqlx::Error::RowNotFound => AppError::not_found("Record not found"),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                AppError::service_unavailable("Database unavailable")
            }
            e if is_transaction_rollback(e) => {
                AppError::service_unavailable("Transaction aborted by the database")
            }
            e => match sqlstate(e).as_deref() {
                // https://www.postgresql.org/docs/current/errcodes-appendix.html
                Some("23505") => AppError::conflict("Duplicate key value"),
                Some("23503") => AppError::conflict("Referenced record is missing"),
                Some("23514") => AppError::bad_request("Check constraint violation"),
                Some("55P03") => AppError::timeout("Lock wait timed out"),
                Some("57014") => AppError::timeout("Statement cancelled"),
                Some(code) if code.starts_with("53") || code.starts_with("57") => {
                    AppError::service_unavailable("Database unavailable")
                }
                _ => AppError::internal("Database error"),
            },
        };
        app_err.with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind::ErrorKind;

    #[test]
    fn test_id_parse_error_conversion() {
        let parse_err = "nope".parse::<crate::id::PersonId>().unwrap_err();
        let app_err: AppError = parse_err.into();
        assert_eq!(app_err.kind(), ErrorKind::BadRequest);
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_sqlx_pool_and_missing_row() {
        let app_err: AppError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(app_err.kind(), ErrorKind::ServiceUnavailable);
        assert!(app_err.is_retryable());

        let app_err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(app_err.kind(), ErrorKind::NotFound);

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(sqlstate(&sqlx::Error::PoolClosed).is_none());
    }
}
