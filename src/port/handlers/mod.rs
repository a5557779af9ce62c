//! Port event handlers.
//!
//! Each submodule handles one source of work: exchange completions,
//! unsolicited requests, RSCN, node state machine application, timers and
//! the top-level dispatch that ties them to the event loop.

mod completion;
mod dispatch;
mod event_loop;
mod login;
mod rscn;
mod timers;
mod unsolicited;

pub use event_loop::now_ms;
pub(crate) use unsolicited::ReplyTo;
