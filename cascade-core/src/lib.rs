//! Cascade Core
//!
//! This crate provides a deterministic, priority-ordered scheduler for
//! reactive dataflow graphs. It implements:
//!
//! - Stores, events and async effects
//! - Derived units: map, filter, combine, sample, forward
//! - A step scheduler with six priority classes
//! - A pluggable runner for effect bodies (Tokio by default)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node table types and the step queue
//! - `reactive`: The `Graph` runtime and the units built on it
//! - `config`: Graph configuration
//! - `error`: Error type shared by every module
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::reactive::Graph;
//!
//! let graph = Graph::new();
//! let deposit = graph.event::<u64>();
//! let balance = graph.store(0_u64);
//!
//! balance.on(&deposit, |balance, amount| balance + amount)?;
//! balance.watch(|balance| println!("balance: {balance}"))?;
//!
//! deposit.fire(100)?;
//! // Prints "balance: 0", then "balance: 100"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::GraphConfig;
pub use error::{Error, Result};
pub use reactive::{Effect, Event, Graph, Store};
