//! Strand Core
//!
//! This crate provides the core of the Strand state container. It
//! implements:
//!
//! - Composable side effects with typed failure channels and cancellation
//! - A unidirectional store: action → side effect of mutations → reduced
//!   state → observers
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `effect`: the side-effect abstraction (constructors, combinators,
//!   subscriptions, executors)
//! - `store`: the `Store` trait and the driver that dispatches actions and
//!   publishes state
//!
//! # Example
//!
//! ```rust,ignore
//! use std::convert::Infallible;
//! use strand_core::effect::SideEffect;
//! use strand_core::store::{Store, StoreDriver};
//!
//! struct Counter;
//!
//! impl Store for Counter {
//!     type State = i32;
//!     type Action = ();
//!     type Mutation = i32;
//!
//!     fn initial_state(&self) -> i32 { 0 }
//!
//!     fn mutate(&self, _state: &i32, _action: ()) -> SideEffect<i32, Infallible> {
//!         SideEffect::just(1)
//!     }
//!
//!     fn reduce(&self, state: i32, mutation: i32) -> i32 {
//!         state + mutation
//!     }
//! }
//!
//! let driver = StoreDriver::new(Counter);
//! driver.send(());
//! assert_eq!(driver.current_state(), 1);
//! ```

pub mod effect;
pub mod error;
pub mod store;

pub use error::{Error, Result};
