//! Infrastructure layer: event store, dispatch, read models and the
//! application services that tie the domain modules together.

pub mod aggregates;
pub mod bootstrap;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod sequencer;
pub mod services;

mod workflows;

#[cfg(test)]
mod integration_tests;

pub use config::{AppConfig, LogFormat};
pub use services::Services;
