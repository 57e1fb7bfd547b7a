//! Recorrido de integración a nivel workspace: del agendado al empaque,
//! verificando el invariante bitácora ↔ estado después de cada operación.
use std::sync::Arc;

use track_core::{ErrorCode, InMemoryTrackingStore, TrackingCoordinator, TrackingStore, UpdateBroadcaster};
use track_domain::{Stage, Status, TrackedUnit};
use uuid::Uuid;

fn check_invariant(coord: &TrackingCoordinator<InMemoryTrackingStore>, serial: &str) {
    let unit = coord.store().get(serial).expect("unit exists");
    assert!(unit.log_consistent(), "invariante roto para {serial}: {:?}/{:?}", unit.stage, unit.status);
}

#[test]
fn batch_lifecycle_with_reject_and_recovery() {
    let broadcaster = Arc::new(UpdateBroadcaster::new());
    let mut coord = TrackingCoordinator::new(InMemoryTrackingStore::new(), Arc::clone(&broadcaster));
    let (_h, events) = broadcaster.subscribe();

    let batch = Uuid::new_v4();
    let serials: Vec<String> = (1..=2).map(|i| format!("INT-{i:03}")).collect();
    for serial in &serials {
        coord.store_mut()
             .insert(TrackedUnit::new(serial.clone(), Some(batch), Some(batch), "scheduler"))
             .unwrap();
    }

    assert!(coord.approve_pending(&serials, "emp-1").success);
    for serial in &serials {
        check_invariant(&coord, serial);
    }

    // INT-001 llega a testing y es rechazada por error de producto.
    for _ in 0..4 {
        assert!(coord.advance_serial("INT-001", "emp-2").success);
        check_invariant(&coord, "INT-001");
    }
    let reject = coord.reject_for_qc(&["INT-001".to_string()], "product_error", Some("soldadura fría".into()), "emp-3");
    assert!(reject.success);
    check_invariant(&coord, "INT-001");
    assert!(coord.store().get("INT-001").unwrap().is_in(Stage::Assembly, Status::FixingProduct));

    // Tras la reparación no hay fila en la tabla para avanzar desde
    // fixing_product: el sobre lo reporta como transición inválida.
    let stuck = coord.advance_serial("INT-001", "emp-2");
    assert!(!stuck.success);
    assert_eq!(stuck.error_code, Some(ErrorCode::InvalidTransition));

    // INT-002 completa el camino feliz hasta el empaque final.
    for _ in 0..4 {
        assert!(coord.advance_serial("INT-002", "emp-2").success);
    }
    assert!(coord.approve_tested(&["INT-002".to_string()], Some("ok".into()), "emp-3").success);
    assert!(coord.advance_serial("INT-002", "emp-2").success);
    check_invariant(&coord, "INT-002");
    assert!(coord.store().get("INT-002").unwrap().is_in(Stage::Completed, Status::Completed));

    // El lote agrupado refleja los estados finales.
    let tracking = coord.tracking_by_batch(batch).unwrap();
    assert_eq!(tracking.stages.get(&Stage::Assembly).map(Vec::len), Some(1));
    assert_eq!(tracking.stages.get(&Stage::Completed).map(Vec::len), Some(1));

    // Todos los eventos difundidos corresponden a commits reales, en orden
    // por unidad.
    let mut received: Vec<(String, Stage, Status)> = Vec::new();
    while let Ok(ev) = events.try_recv() {
        received.push((ev.device_serial, ev.stage, ev.status));
    }
    // 2 aprobaciones + 4 avances + 1 rechazo + 4 avances + 1 aprobación de
    // testeo + 1 avance final.
    assert_eq!(received.len(), 13);
    let last_002: Vec<&(String, Stage, Status)> = received.iter().filter(|(s, _, _)| s == "INT-002").collect();
    assert_eq!(last_002.last().map(|(_, st, s)| (*st, *s)), Some((Stage::Completed, Status::Completed)));
}
