//! Token generation utilities.

use rand::Rng;

/// Generate a random 32-character hex token.
///
/// # Example
///
/// ```rust
/// use mcp_gateway::generate_random_token;
///
/// let token = generate_random_token();
/// assert_eq!(token.len(), 32);
/// assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn generate_random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_length() {
        assert_eq!(generate_random_token().len(), 32);
    }

    #[test]
    fn test_token_is_hex() {
        let token = generate_random_token();
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_random_token(), generate_random_token());
    }
}
