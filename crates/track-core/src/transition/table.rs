//! Tabla de transiciones `(stage, status, acción) → (stage, status)`.
//!
//! Rol en el core:
//! - El espacio completo de transiciones válidas vive en `TRANSITIONS`; el
//!   motor nunca ramifica ad hoc por etapa.
//! - Cualquier tripleta ausente de la tabla es una transición inválida: un
//!   único caso por defecto, sin fallthrough silencioso.
//! - "Advance" es sensible al contexto: el mismo verbo produce destinos
//!   distintos según el par actual, resuelto por búsqueda en la tabla.
use std::fmt;

use track_domain::{RejectReason, Stage, Status};

/// Acción solicitada sobre una unidad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Aprobación masiva de unidades pendientes.
    Approve,
    /// Avance al siguiente estado según el par actual.
    Advance,
    /// Falla reportada durante la carga de firmware.
    FirmwareFailure,
    /// Rechazo en QC; el motivo decide el estado de reparación.
    Reject(RejectReason),
    /// Cancelación terminal de una unidad aún pendiente.
    Cancel,
    /// Aprobación del testeo en QC; cierra la etapa QC con registro doble.
    ApproveTested,
}

/// Clave de acción usada por la tabla (sin el payload del motivo de rechazo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Approve,
    Advance,
    FirmwareFailure,
    Reject,
    Cancel,
}

impl Action {
    /// Clave de búsqueda en la tabla. `ApproveTested` comparte la fila
    /// `qc/testing --advance--> completed/pending_packaging`; sólo difiere en
    /// cómo el motor registra la bitácora.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Approve => ActionKind::Approve,
            Action::Advance | Action::ApproveTested => ActionKind::Advance,
            Action::FirmwareFailure => ActionKind::FirmwareFailure,
            Action::Reject(_) => ActionKind::Reject,
            Action::Cancel => ActionKind::Cancel,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Approve => "approve",
            Action::Advance => "advance",
            Action::FirmwareFailure => "firmware_failure",
            Action::Reject(_) => "reject",
            Action::Cancel => "cancel",
            Action::ApproveTested => "approve_tested",
        };
        f.write_str(s)
    }
}

/// Espacio completo de transiciones válidas.
///
/// La fila de `Reject` apunta al estado de reparación por defecto
/// (`fixing_all`); `resolve` sustituye el status final según el motivo.
pub const TRANSITIONS: &[((Stage, Status, ActionKind), (Stage, Status))] = &[
    ((Stage::Pending, Status::Pending, ActionKind::Approve), (Stage::Assembly, Status::InProgress)),
    ((Stage::Pending, Status::Pending, ActionKind::Cancel), (Stage::Pending, Status::Failed)),
    ((Stage::Assembly, Status::InProgress, ActionKind::Advance), (Stage::Assembly, Status::FirmwareUpload)),
    ((Stage::Assembly, Status::FirmwareUpload, ActionKind::Advance), (Stage::Assembly, Status::FirmwareUploading)),
    ((Stage::Assembly, Status::FirmwareUploading, ActionKind::Advance), (Stage::Qc, Status::FirmwareUploaded)),
    ((Stage::Assembly, Status::FirmwareUploading, ActionKind::FirmwareFailure), (Stage::Assembly, Status::FixingProduct)),
    ((Stage::Qc, Status::FirmwareUploaded, ActionKind::Advance), (Stage::Qc, Status::Testing)),
    ((Stage::Qc, Status::Testing, ActionKind::Advance), (Stage::Completed, Status::PendingPackaging)),
    ((Stage::Qc, Status::Testing, ActionKind::Reject), (Stage::Assembly, Status::FixingAll)),
    ((Stage::Completed, Status::PendingPackaging, ActionKind::Advance), (Stage::Completed, Status::Completed)),
];

/// Resuelve el destino de una acción sobre el par actual, o `None` si la
/// tripleta no existe en la tabla.
pub fn resolve(stage: Stage, status: Status, action: &Action) -> Option<(Stage, Status)> {
    let kind = action.kind();
    let (_, target) = TRANSITIONS.iter()
                                 .find(|((s, st, a), _)| *s == stage && *st == status && *a == kind)?;
    Some(match action {
        Action::Reject(reason) => (target.0, reason.fixing_status()),
        _ => *target,
    })
}
