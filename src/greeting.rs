//! Greeting text lookup

use thiserror::Error;

/// Longest user name accepted, in characters
pub const MAX_NAME_LEN: usize = 64;

/// Greeting lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GreetingError {
    #[error("user name must not be empty")]
    EmptyName,

    #[error("user name exceeds {MAX_NAME_LEN} characters")]
    NameTooLong,

    #[error("user name contains unsupported character {0:?}")]
    InvalidCharacter(char),
}

/// Greeting for `user`.
///
/// Names may contain letters, digits, spaces and `-`, `_`, `.`.
pub fn text_for(user: &str) -> Result<String, GreetingError> {
    let user = user.trim();
    if user.is_empty() {
        return Err(GreetingError::EmptyName);
    }
    if user.chars().count() > MAX_NAME_LEN {
        return Err(GreetingError::NameTooLong);
    }
    if let Some(c) = user
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.')))
    {
        return Err(GreetingError::InvalidCharacter(c));
    }

    Ok(format!("Hello, {}!", user))
}
