//! Candidate invitation consumer
//!
//! Background worker that replicates assessments and their owners from
//! candidate invitation events published on RabbitMQ.

pub mod api;
pub mod config;
pub mod error;
pub mod messaging;
pub mod models;
pub mod processing;
pub mod state;

pub use error::{AppError, Result};
