//! Gateway de persistencia de unidades en seguimiento.
//!
//! El trait `TrackingStore` es la frontera de exclusión mutua del sistema:
//! toda mutación pasa por `apply_all`, que aplica un lote completo de
//! actualizaciones de forma atómica (todo o nada) y verifica la versión
//! esperada de cada fila. El store no dispara notificaciones; eso ocurre
//! después del commit, en el coordinador.
mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;
use track_domain::{Stage, StageLog, Status, TrackedUnit};

pub use memory::InMemoryTrackingStore;

/// Filtro opcional de estado para `find_by_serials`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFilter {
    pub stage: Option<Stage>,
    pub status: Option<Status>,
}

impl StateFilter {
    /// Filtra por el par exacto `(stage, status)`.
    pub fn exact(stage: Stage, status: Status) -> Self {
        StateFilter { stage: Some(stage), status: Some(status) }
    }

    pub fn matches(&self, unit: &TrackedUnit) -> bool {
        self.stage.map_or(true, |s| unit.stage == s) && self.status.map_or(true, |s| unit.status == s)
    }
}

/// Actualización de campos de una unidad, calculada por el motor de
/// transiciones. `expected_version` es la versión leída al planear: el store
/// rechaza el lote completo si alguna fila cambió desde entonces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitUpdate {
    pub production_id: Uuid,
    pub device_serial: String,
    pub stage: Stage,
    pub status: Status,
    pub state_logs: StageLog,
    pub expected_version: i64,
}

/// Repositorio de unidades en seguimiento.
///
/// Contrato:
/// - Las consultas excluyen siempre unidades con borrado lógico.
/// - `find_by_serials` devuelve exactamente el subconjunto que matchea; el
///   caller detecta seriales faltantes comparando cardinalidades.
/// - `apply_all` es la única vía de mutación de estado y es atómica.
pub trait TrackingStore {
    /// Unidades cuyo serial está en `serials` y pasan el filtro opcional.
    fn find_by_serials(&self, serials: &[String], filter: Option<&StateFilter>) -> Result<Vec<TrackedUnit>, StoreError>;

    /// Todas las unidades de un lote de producción.
    fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<TrackedUnit>, StoreError>;

    /// Aplica el lote de actualizaciones como una unidad atómica y devuelve
    /// las unidades ya comprometidas (con versión y `updated_at` nuevos).
    ///
    /// # Errores
    /// - `StoreError::NotFound` si alguna unidad no existe o fue borrada.
    /// - `StoreError::Conflict` si alguna `expected_version` no coincide.
    /// En ambos casos ninguna actualización queda aplicada.
    fn apply_all(&mut self, updates: &[UnitUpdate]) -> Result<Vec<TrackedUnit>, StoreError>;

    /// Alta de una unidad nueva (la invoca el colaborador que agenda lotes).
    fn insert(&mut self, unit: TrackedUnit) -> Result<(), StoreError>;
}

/// Estampa los campos comunes de un commit sobre la unidad ya validada.
/// Compartido por los backends para mantener paridad exacta.
pub(crate) fn commit_update(unit: &mut TrackedUnit, update: &UnitUpdate, now: DateTime<Utc>) {
    unit.stage = update.stage;
    unit.status = update.status;
    unit.state_logs = update.state_logs.clone();
    unit.version += 1;
    unit.updated_at = now;
}
