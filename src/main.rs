//! Raíz de composición de trackflow: arma el store, el broadcaster y el
//! coordinador, y recorre un lote de demostración por el camino completo de
//! producción (aprobación, firmware, QC, rechazo y empaque).
//!
//! Con el feature `pg_demo` el mismo recorrido corre contra Postgres usando
//! `DATABASE_URL` del entorno (.env).
use std::sync::Arc;

use track_core::{OperationResult, TrackingCoordinator, TrackingStore, UpdateBroadcaster};
use track_domain::TrackedUnit;
use uuid::Uuid;

fn main() {
    env_logger::init();

    #[cfg(feature = "pg_demo")]
    {
        run_pg_demo();
        return;
    }

    #[cfg(not(feature = "pg_demo"))]
    {
        let store = track_core::InMemoryTrackingStore::new();
        run_demo(store);
    }
}

/// Recorre el flujo de producción con el backend dado.
fn run_demo<S: TrackingStore>(store: S) {
    let broadcaster = Arc::new(UpdateBroadcaster::new());
    let mut coordinator = TrackingCoordinator::new(store, Arc::clone(&broadcaster));

    // Observador en vivo (un dashboard se suscribiría igual).
    let (_handle, updates) = broadcaster.subscribe();

    // El colaborador de lotes agenda tres unidades nuevas.
    let batch = Uuid::new_v4();
    let prefix = batch.to_string()[..8].to_string();
    let serials: Vec<String> = (1..=3).map(|i| format!("SN-{prefix}-{i:03}")).collect();
    for serial in &serials {
        coordinator.store_mut()
                   .insert(TrackedUnit::new(serial.clone(), Some(batch), Some(batch), "scheduler"))
                   .expect("alta de unidad");
    }

    // Aprobación masiva de las dos primeras: pending -> assembly.
    report("approve_pending", coordinator.approve_pending(&serials[..2], "emp-001"));

    // La primera unidad avanza por firmware hasta QC y se aprueba.
    let first = serials[0].clone();
    for _ in 0..4 {
        report("advance_serial", coordinator.advance_serial(&first, "emp-002"));
    }
    report("approve_tested", coordinator.approve_tested(&[first.clone()], Some("ok".into()), "emp-003"));

    // La segunda falla la carga de firmware.
    let second = serials[1].clone();
    report("advance_serial", coordinator.advance_serial(&second, "emp-002"));
    report("advance_serial", coordinator.advance_serial(&second, "emp-002"));
    report("firmware_failed",
           coordinator.firmware_failed(&second, Some("checksum inválido".into()), "emp-002"));

    // La tercera sigue pendiente y se cancela; el reintento muestra el sobre
    // de error por precondición.
    report("cancel_pending",
           coordinator.cancel_pending(&[serials[2].clone()], Some("lote desestimado".into()), "emp-001"));
    report("cancel_pending (repetida)", coordinator.cancel_pending(&[serials[2].clone()], None, "emp-001"));

    // Estado del lote agrupado por etapa.
    match coordinator.tracking_by_batch(batch) {
        Ok(tracking) => {
            println!("-- lote {batch} --");
            for (stage, units) in &tracking.stages {
                let serials: Vec<&str> = units.iter().map(|u| u.device_serial.as_str()).collect();
                println!("  {stage}: {serials:?}");
            }
        }
        Err(e) => eprintln!("tracking_by_batch: {e}"),
    }

    // Drenar los eventos difundidos durante la corrida.
    println!("-- eventos difundidos --");
    while let Ok(event) = updates.try_recv() {
        println!("  {} -> {}/{} ({} entradas de bitácora)",
                 event.device_serial,
                 event.stage,
                 event.status,
                 event.state_logs.len());
    }
}

fn report(op: &str, result: OperationResult) {
    if result.success {
        println!("[ok]  {op}: {}", result.message);
    } else {
        println!("[err] {op}: {} ({:?})", result.message, result.error_code);
        for v in &result.violations {
            println!("      - {}: {}", v.serial, v.message);
        }
    }
}

#[cfg(feature = "pg_demo")]
fn run_pg_demo() {
    use track_persistence::pg::{PgTrackingStore, PoolProvider};

    let pool = track_persistence::build_dev_pool_from_env().expect("pool Postgres (DATABASE_URL)");
    let store = PgTrackingStore::new(PoolProvider { pool });
    run_demo(store);
}
