//! Unidirectional Store
//!
//! A store turns dispatched actions into state. Its logic lives in an
//! implementation of the [`Store`] trait; a [`StoreDriver`] runs it.
//!
//! # Data Flow
//!
//! ```text
//! send(action) → mutate(state, action) → SideEffect<Mutation, Infallible>
//!                                              ↓ each mutation
//!                        publish(state') ← reduce(state, mutation)
//! ```
//!
//! Observers only ever see fully reduced states. Because `mutate` must
//! return a side effect that cannot fail, the state stream cannot fail
//! either.

mod config;
mod driver;
mod state;

pub use config::{DispatchPolicy, StoreConfig};
pub use driver::{Store, StoreDriver, WeakStoreDriver};
