//! Errores específicos del core de tracking.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use track_domain::{Stage, Status};

/// Error de validación de una transición: el par `(stage, status)` actual de
/// la unidad no tiene fila en la tabla para la acción pedida, o la bitácora
/// quedó en un estado que impide cerrarla.
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum TransitionError {
    #[error("serial {serial}: no transition from {stage}/{status} for action '{action}'")]
    InvalidTransition {
        serial: String,
        stage: Stage,
        status: Status,
        action: String,
    },
    #[error("serial {serial}: inconsistent stage log: {detail}")]
    LogInconsistent { serial: String, detail: String },
}

/// Errores del gateway de persistencia de unidades.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unit not found")]
    NotFound,
    #[error("duplicate serial: {0}")]
    Duplicate(String),
    #[error("version conflict on serial {0}")]
    Conflict(String),
    #[error("store IO error: {0}")]
    Io(String),
}

/// Clasificación gruesa de errores del store para logging/auditoría.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Validation,
    Conflict,
    Transient,
}

/// Clasifica un `StoreError` (los conflictos de versión son reintentables por
/// el caller; los transitorios por la capa de persistencia).
pub fn classify_store_error(e: &StoreError) -> ErrorClass {
    match e {
        StoreError::NotFound => ErrorClass::NotFound,
        StoreError::Duplicate(_) => ErrorClass::Validation,
        StoreError::Conflict(_) => ErrorClass::Conflict,
        StoreError::Io(_) => ErrorClass::Transient,
    }
}
