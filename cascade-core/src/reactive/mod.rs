//! Reactive Units
//!
//! This module implements the units users build graphs from: events,
//! stores, effects, and the combinators connecting them.
//!
//! # Concepts
//!
//! ## Events
//!
//! An Event is a stateless trigger. Firing it starts a step seeded with its
//! payload.
//!
//! ## Stores
//!
//! A Store holds the latest committed value. Reducers attached with `on`
//! commit synchronously at pure priority, so every later node in the step
//! reads the new value.
//!
//! ## Effects
//!
//! An Effect runs an async body outside the step and reports the outcome
//! through `done`, `fail` and `finally`, each of which starts a new step.
//!
//! ## Combinators
//!
//! - `map` / `filter` derive new events and stores (pure priority)
//! - `combine` joins stores into a derived store (barrier priority)
//! - `sample` snapshots stores when a clock fires (sampler priority)
//! - `forward` relays payloads between units (child priority)
//!
//! # Ordering
//!
//! Inside a step, everything at a lower priority runs before anything at a
//! higher one. That is what makes a sample taken in the same step as a
//! reducer see the reducer's commit, and what keeps watchers from observing
//! half-updated joins.

mod combine;
mod effect;
mod event;
mod forward;
mod runner;
mod runtime;
mod sample;
mod store;
mod subscriber;
mod unit;

pub use combine::{Reader, Source};
pub use effect::{Done, Effect, Fail, Settled};
pub use event::Event;
pub use runner::{EffectRunner, TokioRunner};
pub use runtime::Graph;
pub use sample::Sample;
pub use store::{Store, StoreValue};
pub use subscriber::Subscription;
pub use unit::{Data, Target, Unit};
