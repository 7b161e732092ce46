//! API key authentication middleware.
//!
//! Accepts the key in `x-api-key`, as a (Bearer) `Authorization` value, or as
//! the Basic Auth password.

mod middleware;

pub use middleware::{ApiKeyAuthLayer, ApiKeyAuthService, API_KEY_HEADER};
