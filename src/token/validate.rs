use std::sync::LazyLock;

use regex::Regex;

use crate::TallymanError;

/// Shortest raw input accepted, before any prefix is stripped.
pub const MIN_TOKEN_INPUT_LENGTH: usize = 10;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-_]+$").expect("valid token pattern"));

/// Extract the token value from an `Authorization` header or query parameter.
///
/// The last whitespace-separated word is used, so `"Bearer <token>"` works.
pub fn parse_token(raw: &str) -> Result<String, TallymanError> {
    if raw.chars().count() < MIN_TOKEN_INPUT_LENGTH {
        return Err(TallymanError::InvalidToken(format!(
            "token must be at least {MIN_TOKEN_INPUT_LENGTH} characters"
        )));
    }

    let Some(value) = raw.split_whitespace().last() else {
        return Err(TallymanError::InvalidToken("token is blank".to_string()));
    };

    if !TOKEN_PATTERN.is_match(value) {
        return Err(TallymanError::InvalidToken(format!(
            "'{value}' is not a valid token"
        )));
    }

    Ok(value.to_string())
}
