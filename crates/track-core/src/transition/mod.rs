//! Máquina de estados de producción.
//!
//! - `table`: la tabla estática `(stage, status, acción) → (stage, status)`,
//!   única fuente de verdad del espacio de transiciones.
//! - `engine`: validación y construcción de actualizaciones (`UnitUpdate`)
//!   sin mutar nunca la unidad de entrada.
mod engine;
mod table;

pub use engine::TransitionEngine;
pub use table::{resolve, Action, ActionKind, TRANSITIONS};
