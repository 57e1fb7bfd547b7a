//! Motor de transiciones: valida contra la tabla y produce la actualización.
//!
//! El motor es puro: recibe la unidad leída del store, valida la acción
//! completa y devuelve un `UnitUpdate` con el nuevo par `(stage, status)` y la
//! bitácora resultante. Nunca muta la unidad de entrada ni deja estado a
//! medias: si algo falla, no se produjo actualización alguna.
use chrono::{DateTime, Utc};

use super::table::{resolve, Action};
use crate::errors::TransitionError;
use crate::store::UnitUpdate;
use track_domain::{Stage, StageLog, StageLogEntry, Status, TrackedUnit};

pub struct TransitionEngine;

impl TransitionEngine {
    /// Calcula la actualización que produce `action` sobre `unit`.
    ///
    /// Disciplina de bitácora:
    /// - Toda transición cierra la entrada abierta anterior estampando
    ///   `approved_by = employee_id` y `completed_at = now`, y agrega la nueva
    ///   entrada con `started_at = now`.
    /// - `Cancel` agrega una entrada ya cerrada (inicio y fin en el instante de
    ///   la cancelación): es terminal y no pasa por el camino de avance.
    /// - `ApproveTested` agrega dos entradas: el registro cerrado
    ///   `qc/completed` y la entrada abierta `completed/pending_packaging`.
    ///
    /// # Errores
    /// - `TransitionError::InvalidTransition` si la tripleta no está en la
    ///   tabla; lleva el serial y el par actual para el reporte por ítem.
    /// - `TransitionError::LogInconsistent` si la bitácora no se puede cerrar
    ///   (vacía o ya cerrada), señal de una unidad corrupta.
    pub fn plan(unit: &TrackedUnit,
                action: &Action,
                employee_id: &str,
                note: Option<String>,
                now: DateTime<Utc>)
                -> Result<UnitUpdate, TransitionError> {
        let (new_stage, new_status) =
            resolve(unit.stage, unit.status, action).ok_or_else(|| TransitionError::InvalidTransition { serial: unit.device_serial.clone(),
                                                                                                        stage: unit.stage,
                                                                                                        status: unit.status,
                                                                                                        action: action.to_string() })?;

        let mut logs = unit.state_logs.clone();
        close_open_entry(&mut logs, &unit.device_serial, employee_id, now)?;

        match action {
            Action::Cancel => {
                logs.append(StageLogEntry::closed(new_stage, new_status, employee_id, now, note));
            }
            Action::ApproveTested => {
                logs.append(StageLogEntry::closed(Stage::Qc, Status::Completed, employee_id, now, note.clone()));
                logs.append(StageLogEntry::open(new_stage, new_status, employee_id, now, note));
            }
            _ => {
                logs.append(StageLogEntry::open(new_stage, new_status, employee_id, now, note));
            }
        }

        Ok(UnitUpdate { production_id: unit.production_id,
                        device_serial: unit.device_serial.clone(),
                        stage: new_stage,
                        status: new_status,
                        state_logs: logs,
                        expected_version: unit.version })
    }
}

fn close_open_entry(logs: &mut StageLog, serial: &str, employee_id: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
    logs.close_last(employee_id, now)
        .map_err(|e| TransitionError::LogInconsistent { serial: serial.to_string(),
                                                        detail: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use track_domain::RejectReason;

    fn unit_at(stage: Stage, status: Status) -> TrackedUnit {
        let mut unit = TrackedUnit::new("SN-100", None, None, "emp-0");
        // Forzar el par actual manteniendo la bitácora consistente.
        unit.stage = stage;
        unit.status = status;
        unit.state_logs = StageLog::new();
        unit.state_logs
            .append(StageLogEntry::open(stage, status, "emp-0", Utc::now(), None));
        unit
    }

    #[test]
    fn approve_from_pending_opens_assembly_entry() {
        let unit = unit_at(Stage::Pending, Status::Pending);
        let now = Utc::now();
        let update = TransitionEngine::plan(&unit, &Action::Approve, "emp-1", None, now).unwrap();

        assert_eq!((update.stage, update.status), (Stage::Assembly, Status::InProgress));
        assert_eq!(update.state_logs.len(), 2);
        let prev = &update.state_logs.entries()[0];
        assert_eq!(prev.approved_by.as_deref(), Some("emp-1"));
        assert_eq!(prev.completed_at, Some(now));
        let last = update.state_logs.last().unwrap();
        assert!(last.is_open());
        assert_eq!(last.started_at, now);
    }

    #[test]
    fn approve_tested_appends_two_entries() {
        let unit = unit_at(Stage::Qc, Status::Testing);
        let now = Utc::now();
        let update = TransitionEngine::plan(&unit, &Action::ApproveTested, "emp-2", Some("ok".into()), now).unwrap();

        assert_eq!((update.stage, update.status), (Stage::Completed, Status::PendingPackaging));
        assert_eq!(update.state_logs.len(), 3);
        let entries = update.state_logs.entries();
        // testing cerrada con aprobador
        assert_eq!(entries[0].approved_by.as_deref(), Some("emp-2"));
        // registro intermedio qc/completed, cerrado
        assert_eq!((entries[1].stage, entries[1].status), (Stage::Qc, Status::Completed));
        assert!(!entries[1].is_open());
        // entrada final abierta
        assert_eq!((entries[2].stage, entries[2].status), (Stage::Completed, Status::PendingPackaging));
        assert!(entries[2].is_open());
    }

    #[test]
    fn reject_maps_reason_to_fixing_status() {
        let unit = unit_at(Stage::Qc, Status::Testing);
        let update = TransitionEngine::plan(&unit,
                                            &Action::Reject(RejectReason::BlurError),
                                            "emp-3",
                                            Some("etiqueta borrosa".into()),
                                            Utc::now()).unwrap();
        assert_eq!((update.stage, update.status), (Stage::Assembly, Status::FixingLabel));
        assert_eq!(update.state_logs.last().unwrap().note.as_deref(), Some("etiqueta borrosa"));
    }

    #[test]
    fn cancel_appends_fully_closed_entry() {
        let unit = unit_at(Stage::Pending, Status::Pending);
        let now = Utc::now();
        let update = TransitionEngine::plan(&unit, &Action::Cancel, "emp-1", Some("lote desestimado".into()), now).unwrap();

        assert_eq!((update.stage, update.status), (Stage::Pending, Status::Failed));
        let last = update.state_logs.last().unwrap();
        assert_eq!(last.started_at, now);
        assert_eq!(last.completed_at, Some(now));
        assert_eq!(last.note.as_deref(), Some("lote desestimado"));
        // No queda ninguna entrada abierta: el estado es terminal.
        assert!(update.state_logs.open_entry().is_none());
    }

    #[test]
    fn invalid_transition_reports_serial_and_current_pair() {
        let unit = unit_at(Stage::Assembly, Status::InProgress);
        let err = TransitionEngine::plan(&unit, &Action::Cancel, "emp-1", None, Utc::now()).unwrap_err();
        match err {
            TransitionError::InvalidTransition { serial, stage, status, .. } => {
                assert_eq!(serial, "SN-100");
                assert_eq!((stage, status), (Stage::Assembly, Status::InProgress));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plan_never_mutates_the_input_unit() {
        let unit = unit_at(Stage::Pending, Status::Pending);
        let before = unit.clone();
        let _ = TransitionEngine::plan(&unit, &Action::Approve, "emp-1", None, Utc::now()).unwrap();
        assert_eq!(unit, before);
    }
}
