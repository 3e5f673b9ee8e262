//! # Glest Development Tools
//!
//! Command-line tools for development:
//! - Tech tree validation
//! - Game config validation

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod validate;
