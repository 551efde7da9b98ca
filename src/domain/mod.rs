//! Domain layer: the protocol-independent model of a UART session.

pub mod error;
pub mod event_log;
pub mod matcher;
pub mod models;
pub mod settings;
