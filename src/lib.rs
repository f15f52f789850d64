pub mod aggregate;
pub mod constants;
pub mod error;
pub mod export;
pub mod graph;
pub mod logging;
pub mod record;
pub mod registry;
pub mod report;
pub mod stats;

pub use error::{LineageError, Result};
