//! Application Services
//!
//! Services that sit beside the real-time chat core.
//!
//! ## Available Services
//!
//! - **Authenticator**: bearer token verification for connections
//! - **ConversationService**: opening conversations, inbox listing, history paging

pub mod auth_service;
pub mod conversation_service;

// Re-export auth service types
pub use auth_service::{AuthError, Authenticator, Claims, Credentials, JwtAuthenticator};

// Re-export conversation service types
pub use conversation_service::{ConversationError, ConversationService, ConversationServiceImpl};
