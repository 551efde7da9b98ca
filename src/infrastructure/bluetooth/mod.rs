//! Bluetooth Module
//!
//! Nordic UART Service client over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      UartService                         │
//! │  (Public handle - queues commands to the session actor)  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    SessionMachine                        │
//! │  (Scan → connect → discover → subscribe → ready)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │ Provider  │  │ Simulated  │  │ Protocol │
//! │           │  │ / WinRT    │  │          │
//! │ - Trait   │  │ - Radios   │  │ - UUIDs  │
//! │ - Events  │  │            │  │ - Framing│
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - NUS identifiers, command bytes and framing
//! - [`provider`] - Radio abstraction and the completion events it emits
//! - [`session`] - GATT session state machine
//! - [`service`] - Session actor and its public handle
//! - [`simulated`] - Scripted in-process radio
//! - `winrt` - Windows radio (Windows only)

pub mod protocol;
pub mod provider;
pub mod service;
pub mod session;
pub mod simulated;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::UartService;
