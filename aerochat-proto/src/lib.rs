//! Shared data model and push-channel protocol for AeroChat.

pub mod codec;
pub mod model;
pub mod push;
