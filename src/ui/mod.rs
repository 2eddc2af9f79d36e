//! # UI Module
//!
//! Everything the bluelist window draws that is not application logic.
//!
//! - `screen`: The session's presenter; holds what the window shows
//! - `styles`: Shared styling utilities

pub mod screen;
pub mod styles;
