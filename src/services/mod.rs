pub mod engine;
pub mod scheduler;

pub use engine::{PassReport, RuleEngine, RuleOutcome};
pub use scheduler::Scheduler;
