//! Rule and trade persistence
//!
//! - `RuleStore`: the storage contract the engine runs against
//! - `MemoryStore`: in-process store for dry runs and tests
//! - `PostgresStore` (in `adapters`) for production

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::RuleStore;

#[cfg(test)]
pub use store::MockRuleStore;
