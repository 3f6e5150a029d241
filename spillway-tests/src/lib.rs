//! Spillway Tests: cross-crate property and scenario tests.
//!
//! ## Test Organization
//!
//! - `flow_simulation_tests`: seeded random operations against the pool,
//!   governor and selector, checking memory and FIFO properties after
//!   every step.
//! - `engine_tests`: full engine runs driven by the workload generator,
//!   under memory pressure, fault injection and shutdown timeouts.
//!
//! **Support Modules**:
//! - `properties`: property definitions and checkers
//! - `scenarios`: reusable engine configurations and seeds
//!
//! ## Naming Conventions
//!
//! - Simulation tests: `test_sim_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;

#[cfg(test)]
mod engine_tests;
