//! Implementación Postgres (Diesel) del `TrackingStore` del core.
//!
//! Objetivo del módulo:
//! - Proveer un backend durable con paridad 1:1 respecto al store en memoria:
//!   mismas consultas, misma atomicidad de `apply_all`, misma verificación de
//!   versión por fila.
//! - Aislar completamente el mapeo dominio ↔ filas de DB del `track-core`.
//!
//! Decisiones:
//! - El lote completo de `apply_all` corre en UNA transacción Diesel; el
//!   guard de versión es un `UPDATE ... WHERE production_id = .. AND version
//!   = ..`: cero filas afectadas distingue conflicto de inexistencia y
//!   revierte todo el lote.
//! - Errores transitorios (pool, desconexión, conflicto de serialización) se
//!   reintentan con backoff; el conflicto de versión NO se reintenta aquí,
//!   es del caller.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use track_core::errors::{classify_store_error, ErrorClass, StoreError};
use track_core::store::{StateFilter, TrackingStore, UnitUpdate};
use track_domain::{Stage, StageLog, Status, TrackedUnit};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::production_tracking;

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real (producción/tests de integración) o
/// simularlo en tests unitarios sin acoplar a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Obtiene una conexión lista para ejecutar consultas Diesel.
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila mapeada de `production_tracking` para lecturas.
#[derive(Queryable, Debug)]
pub struct UnitRow {
    pub production_id: Uuid,
    pub device_serial: String,
    pub batch_id: Option<Uuid>,
    pub production_batch_id: Option<Uuid>,
    pub stage: String,
    pub status: String,
    pub state_logs: Value,
    pub is_deleted: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fila para insertar en `production_tracking` (alta de unidades).
#[derive(Insertable, Debug)]
#[diesel(table_name = production_tracking)]
pub struct NewUnitRow<'a> {
    pub production_id: &'a Uuid,
    pub device_serial: &'a str,
    pub batch_id: Option<&'a Uuid>,
    pub production_batch_id: Option<&'a Uuid>,
    pub stage: &'a str,
    pub status: &'a str,
    pub state_logs: &'a Value,
    pub is_deleted: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff (hasta 3 intentos: 15ms, 30ms, 45ms).
/// No altera semántica de negocio; sólo repite la unidad de trabajo de `f`.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Los pares `(stage, status)` se persisten como texto estable en minúsculas
/// (el mismo valor que serializa serde); el parseo reutiliza serde para no
/// duplicar la enumeración.
fn parse_stage(s: &str) -> Result<Stage, PersistenceError> {
    serde_json::from_value(Value::String(s.to_string())).map_err(|e| PersistenceError::Unknown(format!("stage '{s}': {e}")))
}

fn parse_status(s: &str) -> Result<Status, PersistenceError> {
    serde_json::from_value(Value::String(s.to_string())).map_err(|e| PersistenceError::Unknown(format!("status '{s}': {e}")))
}

fn unit_from_row(row: UnitRow) -> Result<TrackedUnit, PersistenceError> {
    let stage = parse_stage(&row.stage)?;
    let status = parse_status(&row.status)?;
    let state_logs: StageLog =
        serde_json::from_value(row.state_logs).map_err(|e| PersistenceError::Unknown(format!("state_logs: {e}")))?;
    Ok(TrackedUnit { production_id: row.production_id,
                     device_serial: row.device_serial,
                     batch_id: row.batch_id,
                     production_batch_id: row.production_batch_id,
                     stage,
                     status,
                     state_logs,
                     is_deleted: row.is_deleted,
                     version: row.version,
                     created_at: row.created_at,
                     updated_at: row.updated_at })
}

/// Mapea el error de esta capa al `StoreError` del core y deja el registro de
/// auditoría con su clasificación.
fn store_error(e: PersistenceError) -> StoreError {
    let mapped = match e {
        PersistenceError::NotFound => StoreError::NotFound,
        PersistenceError::UniqueViolation(msg) => StoreError::Duplicate(msg),
        other => StoreError::Io(other.to_string()),
    };
    let error_class = match classify_store_error(&mapped) {
        ErrorClass::NotFound => "not_found",
        ErrorClass::Validation => "validation",
        ErrorClass::Conflict => "conflict",
        ErrorClass::Transient => "transient",
    };
    warn!("store error class={error_class}: {mapped}");
    mapped
}

/// Resultado interno de la transacción de `apply_all`: distingue el conflicto
/// de versión de los errores de Diesel para decidir el `StoreError` final.
enum ApplyError {
    Conflict(String),
    Missing,
    Db(diesel::result::Error),
}

impl From<diesel::result::Error> for ApplyError {
    fn from(e: diesel::result::Error) -> Self {
        ApplyError::Db(e)
    }
}

/// Store durable de unidades sobre Postgres.
pub struct PgTrackingStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgTrackingStore<P> {
    /// Crea el store a partir de un `ConnectionProvider` (generalmente
    /// `PoolProvider`).
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn load_rows(&self, serials: &[String], filter: Option<&StateFilter>) -> Result<Vec<UnitRow>, PersistenceError> {
        use crate::schema::production_tracking::dsl;
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            let mut query = dsl::production_tracking.filter(dsl::is_deleted.eq(false))
                                                    .filter(dsl::device_serial.eq_any(serials))
                                                    .order(dsl::device_serial.asc())
                                                    .into_boxed();
            if let Some(f) = filter {
                if let Some(stage) = f.stage {
                    query = query.filter(dsl::stage.eq(stage.as_str()));
                }
                if let Some(status) = f.status {
                    query = query.filter(dsl::status.eq(status.as_str()));
                }
            }
            query.load(&mut conn).map_err(PersistenceError::from)
        })
    }
}

impl<P: ConnectionProvider> TrackingStore for PgTrackingStore<P> {
    fn find_by_serials(&self, serials: &[String], filter: Option<&StateFilter>) -> Result<Vec<TrackedUnit>, StoreError> {
        debug!("find_by_serials:start count={}", serials.len());
        let rows = self.load_rows(serials, filter).map_err(store_error)?;
        let units = rows.into_iter()
                        .map(unit_from_row)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(store_error)?;
        debug!("find_by_serials:done found={}", units.len());
        Ok(units)
    }

    fn find_by_batch(&self, batch_id: Uuid) -> Result<Vec<TrackedUnit>, StoreError> {
        use crate::schema::production_tracking::dsl;
        debug!("find_by_batch:start batch_id={batch_id}");
        let rows: Vec<UnitRow> = with_retry(|| {
                                     let mut conn = self.provider.connection()?;
                                     dsl::production_tracking.filter(dsl::is_deleted.eq(false))
                                                             .filter(dsl::production_batch_id.eq(batch_id))
                                                             .order(dsl::device_serial.asc())
                                                             .load(&mut conn)
                                                             .map_err(PersistenceError::from)
                                 }).map_err(store_error)?;
        rows.into_iter()
            .map(unit_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)
    }

    fn apply_all(&mut self, updates: &[UnitUpdate]) -> Result<Vec<TrackedUnit>, StoreError> {
        use crate::schema::production_tracking::dsl;
        debug!("apply_all:start count={}", updates.len());

        // Serializar las bitácoras una sola vez, fuera del retry.
        let payloads: Vec<Value> = updates.iter()
                                          .map(|u| serde_json::to_value(&u.state_logs))
                                          .collect::<Result<_, _>>()
                                          .map_err(|e| StoreError::Io(format!("serialize state_logs: {e}")))?;

        let result = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let tx: Result<Vec<UnitRow>, ApplyError> = conn.build_transaction().read_write().run(|tx_conn| {
                let now = Utc::now();
                let mut committed: Vec<UnitRow> = Vec::with_capacity(updates.len());
                for (update, payload) in updates.iter().zip(&payloads) {
                    let target = dsl::production_tracking.filter(dsl::production_id.eq(update.production_id))
                                                         .filter(dsl::is_deleted.eq(false))
                                                         .filter(dsl::version.eq(update.expected_version));
                    let updated: Option<UnitRow> = diesel::update(target).set((dsl::stage.eq(update.stage.as_str()),
                                                                               dsl::status.eq(update.status.as_str()),
                                                                               dsl::state_logs.eq(payload),
                                                                               dsl::version.eq(update.expected_version + 1),
                                                                               dsl::updated_at.eq(now)))
                                                                         .get_result(tx_conn)
                                                                         .optional()?;
                    match updated {
                        Some(row) => committed.push(row),
                        None => {
                            // Cero filas: o la unidad no existe (o fue borrada),
                            // o la versión cambió entre lectura y commit.
                            let exists: Option<i64> = dsl::production_tracking.filter(dsl::production_id.eq(update.production_id))
                                                                              .filter(dsl::is_deleted.eq(false))
                                                                              .select(dsl::version)
                                                                              .first(tx_conn)
                                                                              .optional()?;
                            return Err(match exists {
                                Some(_) => ApplyError::Conflict(update.device_serial.clone()),
                                None => ApplyError::Missing,
                            });
                        }
                    }
                }
                Ok(committed)
            });
            match tx {
                Ok(rows) => Ok(Ok(rows)),
                // El conflicto/faltante ya revirtió la transacción; no se
                // reintenta a este nivel.
                Err(ApplyError::Conflict(serial)) => Ok(Err(StoreError::Conflict(serial))),
                Err(ApplyError::Missing) => Ok(Err(StoreError::NotFound)),
                Err(ApplyError::Db(e)) => Err(PersistenceError::from(e)),
            }
        }).map_err(store_error)?;

        let rows = result?;
        let units = rows.into_iter()
                        .map(unit_from_row)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(store_error)?;
        debug!("apply_all:done committed={}", units.len());
        Ok(units)
    }

    fn insert(&mut self, unit: TrackedUnit) -> Result<(), StoreError> {
        let state_logs = serde_json::to_value(&unit.state_logs).map_err(|e| StoreError::Io(format!("serialize state_logs: {e}")))?;
        let row = NewUnitRow { production_id: &unit.production_id,
                               device_serial: &unit.device_serial,
                               batch_id: unit.batch_id.as_ref(),
                               production_batch_id: unit.production_batch_id.as_ref(),
                               stage: unit.stage.as_str(),
                               status: unit.status.as_str(),
                               state_logs: &state_logs,
                               is_deleted: unit.is_deleted,
                               version: unit.version,
                               created_at: unit.created_at,
                               updated_at: unit.updated_at };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(production_tracking::table).values(&row)
                                                           .execute(&mut conn)
                                                           .map(|_| ())
                                                           .map_err(PersistenceError::from)
        }).map_err(|e| match e {
              // El mensaje de Postgres se reemplaza por el serial en conflicto.
              PersistenceError::UniqueViolation(_) => store_error(PersistenceError::UniqueViolation(unit.device_serial.clone())),
              other => store_error(other),
          })
    }
}

/// Construye un pool Postgres r2d2 a partir de URL.
///
/// Ajusta tamaños inválidos (`min > max` usa `min = max`) y corre las
/// migraciones pendientes una sola vez tras el primer checkout.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración y construye un pool
/// ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
