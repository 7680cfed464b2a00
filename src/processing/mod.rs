pub mod coordinator;

pub use coordinator::{parse_timestamp, UpsertCoordinator};
