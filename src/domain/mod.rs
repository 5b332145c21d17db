pub mod market;
pub mod order;
pub mod rule;
pub mod trade;

pub use market::*;
pub use order::*;
pub use rule::*;
pub use trade::*;
