//! Coordinador de operaciones masivas sobre seriales.
//!
//! Contrato de toda operación bulk (validate-then-commit, todo o nada):
//! 1. Resolver los seriales pedidos contra el store, filtrados al estado de
//!    precondición de la operación.
//! 2. Si la cardinalidad resuelta difiere de la pedida, fallar completo con
//!    `not_found`: hay seriales inexistentes o fuera del estado requerido.
//! 3. Re-validar el estado exacto de cada unidad; juntar violaciones por
//!    serial.
//! 4. Con cualquier violación, fallar completo devolviendo la lista entera.
//! 5. Si no, calcular cada actualización vía el motor y comprometer todas por
//!    el `apply_all` atómico del store.
//! 6. Después del commit, publicar un evento por unidad cambiada. La difusión
//!    jamás demora ni hace fallar la respuesta.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast::{TrackingUpdate, UpdateBroadcaster};
use crate::errors::{StoreError, TransitionError};
use crate::store::{StateFilter, TrackingStore, UnitUpdate};
use crate::transition::{Action, TransitionEngine};
use track_domain::{RejectReason, Stage, Status, TrackedUnit};

/// Código de error del sobre de respuesta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidTransition,
    BadRequest,
    Conflict,
    Internal,
}

/// Violación por serial: qué unidad falló y en qué estado estaba.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialViolation {
    pub serial: String,
    pub stage: Option<Stage>,
    pub status: Option<Status>,
    pub message: String,
}

/// Sobre uniforme de respuesta de toda operación del coordinador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub error_code: Option<ErrorCode>,
    pub message: String,
    pub violations: Vec<SerialViolation>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        OperationResult { success: true,
                          error_code: None,
                          message: message.into(),
                          violations: Vec::new() }
    }

    pub fn fail(code: ErrorCode, message: impl Into<String>, violations: Vec<SerialViolation>) -> Self {
        OperationResult { success: false,
                          error_code: Some(code),
                          message: message.into(),
                          violations }
    }
}

/// Listado de un lote agrupado por etapa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTracking {
    pub batch_id: Uuid,
    pub stages: BTreeMap<Stage, Vec<TrackedUnit>>,
}

/// Orquestador de comandos multi-serial sobre un `TrackingStore`.
///
/// El broadcaster se construye en la raíz de composición y se inyecta por
/// `Arc`; el coordinador publica después del commit y cualquier transporte
/// puede suscribirse a través de [`TrackingCoordinator::broadcaster`].
pub struct TrackingCoordinator<S: TrackingStore> {
    store: S,
    broadcaster: Arc<UpdateBroadcaster>,
}

impl<S: TrackingStore> TrackingCoordinator<S> {
    pub fn new(store: S, broadcaster: Arc<UpdateBroadcaster>) -> Self {
        TrackingCoordinator { store, broadcaster }
    }

    pub fn broadcaster(&self) -> &Arc<UpdateBroadcaster> {
        &self.broadcaster
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Acceso mutable al store para el colaborador de altas (agendado de
    /// lotes) y para seeds de tests.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Aprobación masiva: `pending/pending → assembly/in_progress`.
    pub fn approve_pending(&mut self, serials: &[String], employee_id: &str) -> OperationResult {
        self.bulk_transition(serials, (Stage::Pending, Status::Pending), Action::Approve, None, employee_id, "approve_pending")
    }

    /// Rechazo masivo en QC; el código de motivo decide el estado de
    /// reparación (desconocidos caen en `fixing_all`).
    pub fn reject_for_qc(&mut self, serials: &[String], reason_code: &str, note: Option<String>, employee_id: &str) -> OperationResult {
        let reason = RejectReason::from_code(reason_code);
        self.bulk_transition(serials,
                             (Stage::Qc, Status::Testing),
                             Action::Reject(reason),
                             note,
                             employee_id,
                             "reject_for_qc")
    }

    /// Cancelación masiva terminal; sólo legal en `pending/pending`.
    pub fn cancel_pending(&mut self, serials: &[String], note: Option<String>, employee_id: &str) -> OperationResult {
        self.bulk_transition(serials, (Stage::Pending, Status::Pending), Action::Cancel, note, employee_id, "cancel_pending")
    }

    /// Aprobación masiva del testeo: `qc/testing →
    /// completed/pending_packaging` con registro doble en bitácora.
    pub fn approve_tested(&mut self, serials: &[String], note: Option<String>, employee_id: &str) -> OperationResult {
        self.bulk_transition(serials, (Stage::Qc, Status::Testing), Action::ApproveTested, note, employee_id, "approve_tested")
    }

    /// Avance de una sola unidad; el destino depende del par actual según la
    /// tabla de transiciones.
    pub fn advance_serial(&mut self, serial: &str, employee_id: &str) -> OperationResult {
        self.single_transition(serial, Action::Advance, None, employee_id)
    }

    /// Falla de firmware de una sola unidad:
    /// `assembly/firmware_uploading → assembly/fixing_product`.
    pub fn firmware_failed(&mut self, serial: &str, note: Option<String>, employee_id: &str) -> OperationResult {
        self.single_transition(serial, Action::FirmwareFailure, note, employee_id)
    }

    /// Listado de un lote agrupado por etapa.
    pub fn tracking_by_batch(&self, batch_id: Uuid) -> Result<BatchTracking, StoreError> {
        let units = self.store.find_by_batch(batch_id)?;
        let mut stages: BTreeMap<Stage, Vec<TrackedUnit>> = BTreeMap::new();
        for unit in units {
            stages.entry(unit.stage).or_default().push(unit);
        }
        Ok(BatchTracking { batch_id, stages })
    }

    fn bulk_transition(&mut self,
                       serials: &[String],
                       required: (Stage, Status),
                       action: Action,
                       note: Option<String>,
                       employee_id: &str,
                       op: &str)
                       -> OperationResult {
        let requested = dedupe(serials);
        if requested.is_empty() {
            return OperationResult::fail(ErrorCode::BadRequest, "empty serial list", Vec::new());
        }
        let (req_stage, req_status) = required;
        let filter = StateFilter::exact(req_stage, req_status);
        let found = match self.store.find_by_serials(&requested, Some(&filter)) {
            Ok(found) => found,
            Err(e) => return store_failure(op, &e),
        };

        // Paso 2: comparación de cardinalidades detecta faltantes o unidades
        // fuera de la precondición.
        if found.len() != requested.len() {
            let violations = missing_violations(&requested, &found, req_stage, req_status);
            debug!("{op}: {} of {} serials missing or out of precondition", violations.len(), requested.len());
            return OperationResult::fail(ErrorCode::NotFound,
                                         format!("some serials were not found in state {req_stage}/{req_status}"),
                                         violations);
        }

        // Paso 3: re-validación del estado exacto de cada unidad resuelta.
        let mut violations: Vec<SerialViolation> = Vec::new();
        for unit in &found {
            if !unit.is_in(req_stage, req_status) {
                violations.push(SerialViolation { serial: unit.device_serial.clone(),
                                                  stage: Some(unit.stage),
                                                  status: Some(unit.status),
                                                  message: format!("expected {req_stage}/{req_status}, found {}/{}",
                                                                   unit.stage, unit.status) });
            }
        }

        // Paso 5: planificar todas las actualizaciones; ninguna unidad se muta
        // hasta que el lote entero validó.
        let now = Utc::now();
        let mut updates: Vec<UnitUpdate> = Vec::with_capacity(found.len());
        for unit in &found {
            match TransitionEngine::plan(unit, &action, employee_id, note.clone(), now) {
                Ok(update) => updates.push(update),
                Err(e) => violations.push(transition_violation(unit, e)),
            }
        }
        if !violations.is_empty() {
            return OperationResult::fail(ErrorCode::InvalidTransition,
                                         format!("{op}: {} serial(s) failed validation", violations.len()),
                                         violations);
        }

        self.commit_and_publish(updates, op)
    }

    fn single_transition(&mut self, serial: &str, action: Action, note: Option<String>, employee_id: &str) -> OperationResult {
        if serial.is_empty() {
            return OperationResult::fail(ErrorCode::BadRequest, "empty serial", Vec::new());
        }
        let requested = vec![serial.to_string()];
        let found = match self.store.find_by_serials(&requested, None) {
            Ok(found) => found,
            Err(e) => return store_failure("single_transition", &e),
        };
        let unit = match found.first() {
            Some(unit) => unit,
            None => {
                return OperationResult::fail(ErrorCode::NotFound, format!("serial {serial} not found"), Vec::new());
            }
        };

        let update = match TransitionEngine::plan(unit, &action, employee_id, note, Utc::now()) {
            Ok(update) => update,
            Err(e) => {
                let violation = transition_violation(unit, e);
                let message = violation.message.clone();
                return OperationResult::fail(ErrorCode::InvalidTransition, message, vec![violation]);
            }
        };

        self.commit_and_publish(vec![update], &action.to_string())
    }

    /// Paso 5/6 del contrato: commit atómico y difusión post-commit.
    fn commit_and_publish(&mut self, updates: Vec<UnitUpdate>, op: &str) -> OperationResult {
        let committed = match self.store.apply_all(&updates) {
            Ok(committed) => committed,
            Err(e) => return store_failure(op, &e),
        };

        for unit in &committed {
            self.broadcaster.publish(&TrackingUpdate { device_serial: unit.device_serial.clone(),
                                                       stage: unit.stage,
                                                       status: unit.status,
                                                       state_logs: unit.state_logs.clone() });
        }

        info!("{op}: committed {} unit(s)", committed.len());
        OperationResult::ok(format!("{op}: {} unit(s) updated", committed.len()))
    }
}

fn dedupe(serials: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    serials.iter()
           .filter(|s| !s.is_empty() && seen.insert(s.as_str()))
           .cloned()
           .collect()
}

fn missing_violations(requested: &[String], found: &[TrackedUnit], stage: Stage, status: Status) -> Vec<SerialViolation> {
    requested.iter()
             .filter(|serial| !found.iter().any(|u| &u.device_serial == *serial))
             .map(|serial| SerialViolation { serial: serial.clone(),
                                             stage: None,
                                             status: None,
                                             message: format!("not found in required state {stage}/{status}") })
             .collect()
}

fn transition_violation(unit: &TrackedUnit, error: TransitionError) -> SerialViolation {
    SerialViolation { serial: unit.device_serial.clone(),
                      stage: Some(unit.stage),
                      status: Some(unit.status),
                      message: error.to_string() }
}

/// Fallas del store: los conflictos de versión se reportan como `conflict`
/// (el caller puede reintentar); el resto como error interno. La operación se
/// considera no aplicada en ambos casos.
fn store_failure(op: &str, error: &StoreError) -> OperationResult {
    match error {
        StoreError::Conflict(serial) => OperationResult::fail(ErrorCode::Conflict,
                                                              format!("{op}: concurrent update on serial {serial}"),
                                                              vec![SerialViolation { serial: serial.clone(),
                                                                                     stage: None,
                                                                                     status: None,
                                                                                     message: "version conflict".to_string() }]),
        StoreError::NotFound => OperationResult::fail(ErrorCode::NotFound, format!("{op}: unit disappeared before commit"), Vec::new()),
        other => OperationResult::fail(ErrorCode::Internal, format!("{op}: store failure: {other}"), Vec::new()),
    }
}
