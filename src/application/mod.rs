//! Application Layer
//!
//! The real-time chat core and the services around it. This layer
//! orchestrates the flow of data between the presentation and domain layers.

pub mod chat;
pub mod services;
