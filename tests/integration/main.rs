//! Integration tests: scripted collaborators and multi-cycle simulation.

mod mock_executor;
mod simulation;
