//! Configuration management with environment variable support.

mod base;
mod token;

pub use base::GatewayConfig;
pub use token::generate_random_token;
