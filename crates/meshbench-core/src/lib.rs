pub mod deploy;
pub mod engine;
pub mod error;
pub mod http;
pub mod plan;
pub mod results;

pub use error::BenchError;
