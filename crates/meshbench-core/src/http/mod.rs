pub mod classifier;
pub mod client;
pub mod flow;
pub mod payload;
pub mod probe;

pub use classifier::{StatusCodeClassifier, SuccessClassifier};
pub use client::HttpClient;
pub use flow::{RenderedRequest, RequestFlow};
pub use payload::{placeholders, render_payload, substitute};
pub use probe::{Probe, ProbeOutcome, ProbeResult, ProbeTarget, RequestProbe};
