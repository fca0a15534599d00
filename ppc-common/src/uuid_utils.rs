//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Generate a realtime session identifier (`rt-<uuid>`)
pub fn generate_session_id() -> String {
    format!("rt-{}", Uuid::new_v4().simple())
}
