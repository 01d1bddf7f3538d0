//! Herald dispatch pipeline.
//!
//! Three long-running consumers hang off the broker:
//!
//! - the **dispatcher** takes events whose broker delay has elapsed and
//!   re-publishes them, without delay, to the blast fanout or the per-user
//!   direct exchange;
//! - the **blast** and **user** consumers decode events and hand them to
//!   the [`DispatchEngine`], which renders per channel, invokes the channel
//!   adapters and records delivery logs with partial-success semantics.

pub mod blast;
pub mod dispatcher;
pub mod engine;
pub mod idempotency;
pub mod user;

pub use blast::BlastHandler;
pub use dispatcher::DispatcherHandler;
pub use engine::DispatchEngine;
pub use idempotency::{IdempotencyStore, RedisIdempotencyStore};
pub use user::UserHandler;
