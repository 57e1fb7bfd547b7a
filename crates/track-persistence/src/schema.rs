//! Esquema Diesel (declarado manualmente). Reemplazable con `diesel print-schema`.

diesel::table! {
    production_tracking (production_id) {
        production_id -> Uuid,
        device_serial -> Text,
        batch_id -> Nullable<Uuid>,
        production_batch_id -> Nullable<Uuid>,
        stage -> Text,
        status -> Text,
        state_logs -> Jsonb,
        is_deleted -> Bool,
        version -> BigInt,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
