//! Fleet Auth Types
//!
//! Core type definitions for the credential lifecycle.

pub mod auth;
pub mod config;
pub mod token;

pub use auth::*;
pub use config::*;
pub use token::*;
