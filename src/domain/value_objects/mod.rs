//! # Domain Value Objects
//!
//! Immutable value types that represent domain concepts without identity.
//!
//! - **UserId / ConversationId / MessageId**: canonical snowflake identifiers

mod ids;

pub use ids::*;
