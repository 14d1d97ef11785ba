pub mod bus;
pub mod otlp;
pub mod pipeline;
pub mod server;

pub use bus::{Bus, Subscriber, Topic};
pub use pipeline::{BatchOutcome, Pipeline, PipelineConfig};
