use std::time::Duration;

use thiserror::Error;

use crate::parser::FieldKind;

/// Failures raised while scanning sources, reading page fields, or persisting records.
///
/// `SourceUnavailable`, `FieldTimeout` and `MalformedRecord` are recovered by the
/// drivers (logged, counted, skipped). `SinkUnavailable` and `AuthenticationFailed`
/// end the current batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source '{origin}' is unavailable: {reason}")]
    SourceUnavailable { origin: String, reason: String },
    #[error("field '{field}' not present at '{selector}' after {waited:?}")]
    FieldTimeout {
        field: FieldKind,
        selector: String,
        waited: Duration,
    },
    #[error("record rejected by sink: {0}")]
    MalformedRecord(String),
    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("portal login did not complete after {attempts} attempt(s)")]
    AuthenticationFailed { attempts: u32 },
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IngestError {
    pub fn source_unavailable(origin: impl Into<String>, reason: impl ToString) -> Self {
        IngestError::SourceUnavailable {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors after which the batch loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::SinkUnavailable(_)
                | IngestError::AuthenticationFailed { .. }
                | IngestError::Configuration(_)
        )
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(err.code, ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch) =>
            {
                IngestError::MalformedRecord(e.to_string())
            }
            rusqlite::Error::ToSqlConversionFailure(_)
            | rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::InvalidColumnType(..) => IngestError::MalformedRecord(e.to_string()),
            _ => IngestError::SinkUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_is_malformed() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE NOT NULL); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        let mapped = IngestError::from(err);
        assert!(matches!(mapped, IngestError::MalformedRecord(_)));
        assert!(!mapped.is_fatal());
    }

    #[test]
    fn missing_table_is_sink_unavailable() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("INSERT INTO nope VALUES (1)", []).unwrap_err();
        assert!(IngestError::from(err).is_fatal());
    }
}
