pub mod factory;
mod traits;

pub use factory::build_broker_client;
pub use traits::{parse_broker_kind, BrokerClient, BrokerKind};

#[cfg(test)]
pub use traits::MockBrokerClient;
