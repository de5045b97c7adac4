//! Fleet Auth Core Components
//!
//! HTTP transport shared by the token endpoint client and the secret backend.

pub mod transport;

pub use transport::*;
