//! Unidad física en seguimiento a lo largo de la producción.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::{Stage, Status};
use crate::stage_log::{StageLog, StageLogEntry};

/// Una instancia física de dispositivo moviéndose por producción.
///
/// Invariantes (verificables con [`TrackedUnit::log_consistent`]):
/// - `stage`/`status` siempre igualan la última entrada de `state_logs`.
/// - A lo sumo una entrada de `state_logs` está abierta.
/// - Sólo el motor de transiciones muta `stage`/`status`/`state_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedUnit {
    /// Identificador opaco, asignado en la creación, inmutable.
    pub production_id: Uuid,
    /// Identificador de negocio único de la unidad física.
    pub device_serial: String,
    pub batch_id: Option<Uuid>,
    pub production_batch_id: Option<Uuid>,
    pub stage: Stage,
    pub status: Status,
    pub state_logs: StageLog,
    /// Borrado lógico: las unidades borradas quedan fuera de toda consulta.
    pub is_deleted: bool,
    /// Contador de concurrencia optimista; lo incrementa el store en cada
    /// commit y lo verifica `apply_all`.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedUnit {
    /// Crea una unidad nueva en `pending/pending` con su primera entrada de
    /// bitácora abierta (el colaborador de lotes la invoca al agendar).
    pub fn new(device_serial: impl Into<String>, batch_id: Option<Uuid>, production_batch_id: Option<Uuid>, employee_id: &str) -> Self {
        let now = Utc::now();
        let mut state_logs = StageLog::new();
        state_logs.append(StageLogEntry::open(Stage::Pending, Status::Pending, employee_id, now, None));
        TrackedUnit { production_id: Uuid::new_v4(),
                      device_serial: device_serial.into(),
                      batch_id,
                      production_batch_id,
                      stage: Stage::Pending,
                      status: Status::Pending,
                      state_logs,
                      is_deleted: false,
                      version: 0,
                      created_at: now,
                      updated_at: now }
    }

    /// Indica si la unidad está exactamente en el par `(stage, status)` dado.
    pub fn is_in(&self, stage: Stage, status: Status) -> bool {
        self.stage == stage && self.status == status
    }

    /// Verifica el invariante bitácora ↔ estado actual: la última entrada
    /// existe, está abierta (o cerrada si el estado es terminal por
    /// cancelación) y coincide con `stage`/`status`.
    pub fn log_consistent(&self) -> bool {
        let open_count = self.state_logs
                             .entries()
                             .iter()
                             .filter(|e| e.is_open())
                             .count();
        match self.state_logs.last() {
            Some(last) => last.stage == self.stage && last.status == self.status && open_count <= 1,
            None => false,
        }
    }
}
