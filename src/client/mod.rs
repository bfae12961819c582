//! Consumer-side chat state.
//!
//! [`ClientStore`] replays server events into a local view (conversation
//! list, per-conversation history, typing and unread state) and produces the
//! commands a client sends upward. It does no I/O; a transport feeds it
//! events and ships the commands it returns.

mod backoff;
mod store;

pub use backoff::ReconnectBackoff;
pub use store::{ClientStore, LoadState, PendingMessage};
