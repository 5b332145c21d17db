//! Rule evaluation and order flow
//!
//! Per rule, per tick:
//! - `lifecycle`: reconcile the last order with the broker
//! - `context` / `expr`: evaluate the rule predicates against the quote
//! - `decision`: pick buy, sell, or a trailing-stop update
//! - `executor`: place the order under the per-rule `guard`

pub mod context;
pub mod decision;
pub mod executor;
pub mod expr;
pub mod guard;
pub mod lifecycle;

pub use context::{build_context, DecisionContext};
pub use decision::{decide, Decision, OrderIntent, PricePolicy, Reason, TrailingUpdate};
pub use executor::{OrderExecutor, PlacementOutcome};
pub use expr::{Expr, Metadata, PredicateCache, PredicateKind};
pub use guard::{GuardToken, OrderGuard};
pub use lifecycle::{Reconciled, TradeLifecycle};
