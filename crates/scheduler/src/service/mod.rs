//! The task scheduling service.
//!
//! One mutex guards all bookkeeping: the priority queue, the task map, the
//! dispatched slot, the timer registry and the worker session. It is never
//! held across an await point. Background work (timeout timers, the worker
//! event loop and the health check) holds only a weak reference to the
//! service, so dropping the last handle stops it.

mod core;
mod dispatch;
mod events;
mod lifecycle;
mod queue;
mod timers;


pub use self::core::TaskScheduler;
