//! Shared helpers used across config structs.

pub mod duration_serde;
