//! Cargo booking and handling lifecycle.
//!
//! [`service::CargoService`] is the entry point: it authenticates users, books
//! cargo onto flights and moves cargo through `PENDING -> IN_TRANSIT ->
//! DELIVERED`, recording a handler action for every step. Storage sits behind
//! [`store::CargoStore`], with a sled implementation in [`store::SledStore`].

pub mod cargo;
pub mod config;
pub mod error;
pub mod fleet;
pub mod handler_action;
pub mod identity;
pub mod pricing;
pub mod service;
pub mod store;
pub mod utils;
