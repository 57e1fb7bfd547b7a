//! track-persistence
//!
//! Implementación Postgres (Diesel) del `TrackingStore` del core, más
//! utilidades de conexión y migraciones. El backend durable mantiene paridad
//! 1:1 con el store en memoria: mismas consultas, misma semántica atómica de
//! `apply_all` y la misma verificación de versión por fila.
//!
//! Módulos:
//! - `pg`: el store sobre Postgres (tabla `production_tracking`).
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tabla Diesel declarada para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgTrackingStore, PoolProvider};
