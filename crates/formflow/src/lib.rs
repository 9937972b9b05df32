//! Form definitions, the pure evaluation engine behind them, and the submission approval
//! workflow built on top.

pub mod config;
pub mod error;
pub mod forms;
pub mod submissions;
pub mod telemetry;
