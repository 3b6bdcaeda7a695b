//! Common code shared between `sign_server` and `hand_sender`.
pub mod landmarks;
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
