//! Etapas y estados del proceso de producción.
//!
//! Rol en el dominio:
//! - `Stage` es la fase gruesa por la que pasa una unidad física.
//! - `Status` es el estado fino dentro de la etapa; un `Status` sólo tiene
//!   sentido relativo a su `Stage` (la tabla de transiciones del core define
//!   qué pares son válidos).
//! - `RejectReason` codifica el motivo de rechazo en QC y decide a qué estado
//!   de reparación vuelve la unidad.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fase gruesa de producción.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Assembly,
    Qc,
    Fixing,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    /// Nombre estable en minúsculas (igual al valor serializado).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Assembly => "assembly",
            Stage::Qc => "qc",
            Stage::Fixing => "fixing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado fino dentro de una etapa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    FirmwareUpload,
    FirmwareUploading,
    FirmwareUploaded,
    FirmwareFailed,
    Testing,
    PendingPackaging,
    FixingLabel,
    FixingProduct,
    FixingAll,
    Completed,
    Failed,
}

impl Status {
    /// Nombre estable en minúsculas (igual al valor serializado).
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::FirmwareUpload => "firmware_upload",
            Status::FirmwareUploading => "firmware_uploading",
            Status::FirmwareUploaded => "firmware_uploaded",
            Status::FirmwareFailed => "firmware_failed",
            Status::Testing => "testing",
            Status::PendingPackaging => "pending_packaging",
            Status::FixingLabel => "fixing_label",
            Status::FixingProduct => "fixing_product",
            Status::FixingAll => "fixing_all",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Motivo de rechazo en QC.
///
/// Se parsea desde el código textual que envía el cliente. Cualquier código no
/// enumerado cae en `Other` y por lo tanto en `fixing_all`: es el fallback
/// deliberado heredado del sistema original, preservado por compatibilidad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BlurError,
    ProductError,
    Other,
}

impl RejectReason {
    /// Parsea el código de motivo; códigos desconocidos caen en `Other`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "blur_error" => RejectReason::BlurError,
            "product_error" => RejectReason::ProductError,
            _ => RejectReason::Other,
        }
    }

    /// Estado de reparación al que vuelve la unidad según el motivo.
    pub fn fixing_status(&self) -> Status {
        match self {
            RejectReason::BlurError => Status::FixingLabel,
            RejectReason::ProductError => Status::FixingProduct,
            RejectReason::Other => Status::FixingAll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_serde_roundtrip_uses_snake_case() {
        let s = serde_json::to_string(&Stage::Assembly).unwrap();
        assert_eq!(s, "\"assembly\"");
        let back: Stage = serde_json::from_str(&s).unwrap();
        assert_eq!(back, Stage::Assembly);
    }

    #[test]
    fn status_display_matches_serialized_value() {
        assert_eq!(Status::PendingPackaging.to_string(), "pending_packaging");
        assert_eq!(Status::FirmwareUploading.as_str(), "firmware_uploading");
    }

    #[test]
    fn reject_reason_maps_known_codes() {
        assert_eq!(RejectReason::from_code("blur_error").fixing_status(), Status::FixingLabel);
        assert_eq!(RejectReason::from_code("product_error").fixing_status(), Status::FixingProduct);
    }

    #[test]
    fn reject_reason_unknown_code_falls_back_to_fixing_all() {
        // Fallback heredado: nunca se rechaza el request por motivo desconocido.
        assert_eq!(RejectReason::from_code("scratched").fixing_status(), Status::FixingAll);
        assert_eq!(RejectReason::from_code("").fixing_status(), Status::FixingAll);
    }
}
