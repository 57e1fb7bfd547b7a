//! Backend en memoria del `TrackingStore` (referencia y tests).
use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::{commit_update, StateFilter, TrackingStore, UnitUpdate};
use crate::errors::StoreError;
use track_domain::TrackedUnit;

/// Store en memoria indexado por serial. La atomicidad de `apply_all` se
/// obtiene validando el lote completo antes de tocar ninguna unidad.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    inner: HashMap<String, TrackedUnit>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acceso directo por serial (incluye borradas; útil en tests).
    pub fn get(&self, serial: &str) -> Option<&TrackedUnit> {
        self.inner.get(serial)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl TrackingStore for InMemoryTrackingStore {
    fn find_by_serials(&self, serials: &[String], filter: Option<&StateFilter>) -> Result<Vec<TrackedUnit>, StoreError> {
        let mut found: Vec<TrackedUnit> = Vec::with_capacity(serials.len());
        for serial in serials {
            if let Some(unit) = self.inner.get(serial) {
                if unit.is_deleted {
                    continue;
                }
                if filter.map_or(true, |f| f.matches(unit)) {
                    found.push(unit.clone());
                }
            }
        }
        Ok(found)
    }

    fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<TrackedUnit>, StoreError> {
        let mut units: Vec<TrackedUnit> = self.inner
                                              .values()
                                              .filter(|u| !u.is_deleted && u.production_batch_id == Some(batch_id))
                                              .cloned()
                                              .collect();
        units.sort_by(|a, b| a.device_serial.cmp(&b.device_serial));
        Ok(units)
    }

    fn apply_all(&mut self, updates: &[UnitUpdate]) -> Result<Vec<TrackedUnit>, StoreError> {
        // Fase 1: validar existencia y versión de todo el lote.
        for update in updates {
            let unit = self.inner
                           .get(&update.device_serial)
                           .filter(|u| !u.is_deleted)
                           .ok_or(StoreError::NotFound)?;
            if unit.version != update.expected_version {
                return Err(StoreError::Conflict(update.device_serial.clone()));
            }
        }
        // Fase 2: aplicar; ya no puede fallar.
        let now = Utc::now();
        let mut committed = Vec::with_capacity(updates.len());
        for update in updates {
            let unit = self.inner
                           .get_mut(&update.device_serial)
                           .expect("validated in phase 1");
            commit_update(unit, update, now);
            committed.push(unit.clone());
        }
        Ok(committed)
    }

    fn insert(&mut self, unit: TrackedUnit) -> Result<(), StoreError> {
        if self.inner.contains_key(&unit.device_serial) {
            return Err(StoreError::Duplicate(unit.device_serial));
        }
        self.inner.insert(unit.device_serial.clone(), unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use track_domain::{Stage, Status};

    fn seed(store: &mut InMemoryTrackingStore, serial: &str) -> TrackedUnit {
        let unit = TrackedUnit::new(serial, None, None, "emp-1");
        store.insert(unit.clone()).unwrap();
        unit
    }

    #[test]
    fn find_by_serials_returns_matching_subset() {
        let mut store = InMemoryTrackingStore::new();
        seed(&mut store, "A");
        seed(&mut store, "B");

        let serials = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let found = store.find_by_serials(&serials, None).unwrap();
        assert_eq!(found.len(), 2);

        // El filtro exacto deja fuera unidades en otro estado.
        let filter = StateFilter::exact(Stage::Qc, Status::Testing);
        let found = store.find_by_serials(&serials, Some(&filter)).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn soft_deleted_units_are_invisible() {
        let mut store = InMemoryTrackingStore::new();
        let mut unit = TrackedUnit::new("A", None, None, "emp-1");
        unit.is_deleted = true;
        store.insert(unit).unwrap();

        let found = store.find_by_serials(&["A".to_string()], None).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn apply_all_rejects_version_mismatch_without_partial_apply() {
        let mut store = InMemoryTrackingStore::new();
        let a = seed(&mut store, "A");
        let b = seed(&mut store, "B");

        let ok = UnitUpdate { production_id: a.production_id,
                              device_serial: "A".to_string(),
                              stage: Stage::Assembly,
                              status: Status::InProgress,
                              state_logs: a.state_logs.clone(),
                              expected_version: a.version };
        let stale = UnitUpdate { production_id: b.production_id,
                                 device_serial: "B".to_string(),
                                 stage: Stage::Assembly,
                                 status: Status::InProgress,
                                 state_logs: b.state_logs.clone(),
                                 expected_version: b.version + 7 };

        let err = store.apply_all(&[ok, stale]).unwrap_err();
        assert_eq!(err, StoreError::Conflict("B".to_string()));
        // Nada quedó aplicado, ni siquiera la actualización válida.
        assert_eq!(store.get("A").unwrap().stage, Stage::Pending);
        assert_eq!(store.get("A").unwrap().version, 0);
    }

    #[test]
    fn apply_all_bumps_version_and_updated_at() {
        let mut store = InMemoryTrackingStore::new();
        let a = seed(&mut store, "A");

        let update = UnitUpdate { production_id: a.production_id,
                                  device_serial: "A".to_string(),
                                  stage: Stage::Assembly,
                                  status: Status::InProgress,
                                  state_logs: a.state_logs.clone(),
                                  expected_version: 0 };
        let committed = store.apply_all(&[update]).unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].version, 1);
        assert!(committed[0].updated_at >= a.updated_at);
    }

    #[test]
    fn insert_duplicate_serial_is_rejected() {
        let mut store = InMemoryTrackingStore::new();
        seed(&mut store, "A");
        let dup = TrackedUnit::new("A", None, None, "emp-1");
        assert_eq!(store.insert(dup).unwrap_err(), StoreError::Duplicate("A".to_string()));
    }
}
