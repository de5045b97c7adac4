//! Authorization Flows
//!
//! The Fleet API only uses the authorization-code grant. The operator-facing
//! redirect receiver lives outside this crate.

pub mod authorization_code;

pub use authorization_code::{build_authorization_url, generate_state};
