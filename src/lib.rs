// src/lib.rs
pub mod api;
pub mod banner;
pub mod channel;
pub mod config;
pub mod database;
pub mod errors;
pub mod evaluator;
pub mod harvester;
pub mod models;
pub mod registry;
pub mod session;

#[doc(hidden)]
pub mod testing;
