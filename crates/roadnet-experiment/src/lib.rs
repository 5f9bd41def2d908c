//! Road-network negotiation experiments.
//!
//! This crate drives the negotiation kernel through its actor layer:
//! - Generates lattice networks and random Travellers from a seed
//! - Runs single negotiations and strategy grids
//! - Aggregates finalize rates and costs with standard errors

pub mod experiment;
pub mod generator;
pub mod results;
pub mod round_driver;
