// src/models/mod.rs

pub mod group;
pub mod record;

// Реэкспорт

pub use group::{GroupMapping, GroupMembership, LocalGroup};
pub use record::{Asset, SyncRecord};
