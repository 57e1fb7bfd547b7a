//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas de esta capa.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => Self::UniqueViolation(info.message().to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => Self::SerializationConflict,
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::DatabaseError(kind, info) => Self::Unknown(format!("db error kind {:?}: {}", kind, info.message())),
            other => Self::Unknown(format!("diesel error: {other:?}")),
        }
    }
}
