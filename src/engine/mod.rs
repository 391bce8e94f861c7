//! Core engine: economy, position lifecycle, outcome simulation, retrying
//! execution, and the cycle orchestrator that ties them together.

pub mod cycle;
pub mod economy;
pub mod executor;
pub mod lifecycle;
pub mod simulator;
