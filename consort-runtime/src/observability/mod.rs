//! Structured-logging vocabulary shared by all runtime components.

pub mod events;
