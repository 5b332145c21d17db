//! Process-wide coordination: kill switch and graceful shutdown

pub mod kill_switch;
pub mod shutdown;

pub use kill_switch::{KillReason, KillState, KillSwitch};
pub use shutdown::{install_signal_handlers, Shutdown, ShutdownSignal, ShutdownToken};
