pub use engine::{ConsumerEngine, EngineHandle};
pub use message::{ConsumedMessage, MessageSink};
pub use orchestrator::ConsumptionOrchestrator;

mod engine;
mod message;
mod orchestrator;

#[cfg(test)]
pub(crate) mod testkit;
