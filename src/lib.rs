pub mod adapters;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod services;
pub mod strategy;

pub use adapters::{FillMode, NotificationSink, PaperBroker, PostgresStore, RestBroker};
pub use config::AppConfig;
pub use coordination::{KillReason, KillSwitch, Shutdown, ShutdownSignal};
pub use error::{RejectionKind, Result, RulebotError};
pub use exchange::{build_broker_client, BrokerClient, BrokerKind};
pub use persistence::{MemoryStore, RuleStore};
pub use services::{PassReport, RuleEngine, RuleOutcome, Scheduler};
