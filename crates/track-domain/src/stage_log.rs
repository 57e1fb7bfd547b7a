//! Bitácora de transiciones de una unidad (append-only).
//!
//! Rol en el dominio:
//! - Cada unidad lleva una secuencia ordenada de `StageLogEntry`, de la más
//!   antigua a la más reciente.
//! - Nunca se reordena ni se trunca: sólo se agrega al final, y la última
//!   entrada puede cerrarse en el momento previo a agregar la siguiente.
//! - A lo sumo una entrada está abierta (`completed_at == None`) y corresponde
//!   al `stage`/`status` actual de la unidad.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::stage::{Stage, Status};

/// Registro inmutable de una transición: el estado al que entró la unidad,
/// quién lo inició y quién lo cerró.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: Stage,
    pub status: Status,
    pub employee_id: String,
    /// Actor que aprobó la salida de esta etapa; se estampa cuando la
    /// transición siguiente cierra la entrada.
    pub approved_by: Option<String>,
    pub started_at: DateTime<Utc>,
    /// `None` mientras la entrada es la actual (abierta).
    pub completed_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl StageLogEntry {
    /// Crea una entrada abierta (la unidad acaba de entrar a este estado).
    pub fn open(stage: Stage, status: Status, employee_id: impl Into<String>, started_at: DateTime<Utc>, note: Option<String>) -> Self {
        StageLogEntry { stage,
                        status,
                        employee_id: employee_id.into(),
                        approved_by: None,
                        started_at,
                        completed_at: None,
                        note }
    }

    /// Crea una entrada ya cerrada (inicio y cierre en el mismo instante).
    /// Se usa para cancelaciones y para el registro intermedio `qc/completed`.
    pub fn closed(stage: Stage, status: Status, employee_id: impl Into<String>, at: DateTime<Utc>, note: Option<String>) -> Self {
        let employee_id = employee_id.into();
        StageLogEntry { stage,
                        status,
                        employee_id: employee_id.clone(),
                        approved_by: Some(employee_id),
                        started_at: at,
                        completed_at: Some(at),
                        note }
    }

    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Secuencia append-only de entradas, de la más antigua a la más reciente.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageLog {
    entries: Vec<StageLogEntry>,
}

impl StageLog {
    pub fn new() -> Self {
        StageLog { entries: Vec::new() }
    }

    /// Agrega una entrada al final. No valida semántica: el orden es la única
    /// garantía aquí; la validez de la transición la decide el motor.
    pub fn append(&mut self, entry: StageLogEntry) {
        self.entries.push(entry);
    }

    /// Cierra la última entrada estampando `approved_by` y `completed_at`.
    ///
    /// # Errores
    /// Retorna `DomainError::ValidationError` si la bitácora está vacía o la
    /// última entrada ya estaba cerrada; no modifica nada en ese caso.
    pub fn close_last(&mut self, approved_by: &str, completed_at: DateTime<Utc>) -> Result<(), DomainError> {
        let last = self.entries
                       .last_mut()
                       .ok_or_else(|| DomainError::ValidationError("No se puede cerrar una bitácora vacía".to_string()))?;
        if !last.is_open() {
            return Err(DomainError::ValidationError("La última entrada de la bitácora ya está cerrada".to_string()));
        }
        last.approved_by = Some(approved_by.to_string());
        last.completed_at = Some(completed_at);
        Ok(())
    }

    // Getters
    pub fn entries(&self) -> &[StageLogEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&StageLogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entrada abierta actual, si existe.
    pub fn open_entry(&self) -> Option<&StageLogEntry> {
        self.entries.last().filter(|e| e.is_open())
    }
}

impl<'a> IntoIterator for &'a StageLog {
    type Item = &'a StageLogEntry;
    type IntoIter = std::slice::Iter<'a, StageLogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
