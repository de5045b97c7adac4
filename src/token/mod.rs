//! Token Management
//!
//! Credential lifecycle: token endpoint exchanges, merged persistence and the
//! lifecycle manager handing out valid access tokens.

pub mod manager;
pub mod refresher;
pub mod store;

// Token Refresher
pub use refresher::{
    create_mock_token_refresher, DefaultTokenRefresher, MockTokenRefresher, TokenRefresher,
};

// Token Store
pub use store::{LoadedRecord, TokenStore};

// Lifecycle Manager
pub use manager::{CredentialState, LifecycleConfig, TokenLifecycleManager};
