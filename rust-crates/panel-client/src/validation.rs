//! Checks applied before a request leaves the client.

use crate::error::{
    Error,
    Result,
};

pub const MAX_CLIENT_NAME_LEN: usize = 9;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Games whose panel ignores the requested password and always resets to its own default.
pub const FIXED_PASSWORD_GAMES: &[(&str, &str)] = &[("LOTUSBOOK", "Lotu@1255")];

const PASSWORD_SPECIALS: &[char] = &['@', '$', '!', '%', '*', '?', '&'];
const COMMON_PASSWORDS: &[&str] = &[
    "Abcd@1234",
    "Password@123",
    "Admin@123",
    "Test@1234",
    "User@1234",
];
const SEQUENCE_LEN: usize = 4;

pub fn validate_client_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Invalid("Client name is required".to_string()));
    }
    if name.chars().count() > MAX_CLIENT_NAME_LEN {
        return Err(Error::Invalid(format!(
            "Client name must be maximum {MAX_CLIENT_NAME_LEN} characters"
        )));
    }
    if name.contains(char::is_whitespace) {
        return Err(Error::Invalid("Client name cannot contain spaces".to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Invalid(
            "Client name can only contain letters and numbers".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.contains(char::is_whitespace) {
        return Err(Error::Invalid("Password cannot contain spaces".to_string()));
    }
    let allowed = password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(&c));
    let strong = password.chars().count() >= MIN_PASSWORD_LEN
        && allowed
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(&c));
    if !strong {
        return Err(Error::Invalid(
            "Password must contain 8+ characters with 1 uppercase, 1 lowercase, 1 number, 1 special character"
                .to_string(),
        ));
    }
    if COMMON_PASSWORDS.contains(&password) {
        return Err(Error::Invalid("Password is too common".to_string()));
    }
    if has_alphabetic_run(password) {
        return Err(Error::Invalid(
            "Password cannot contain sequential letters".to_string(),
        ));
    }
    Ok(())
}

/// Password actually sent for a reset: the panel default for fixed-password games, otherwise
/// the requested one once it passes [`validate_password`].
pub fn reset_password_for(game_name: Option<&str>, requested: Option<&str>) -> Result<String> {
    if let Some((_, fixed)) = game_name.and_then(|game| {
        FIXED_PASSWORD_GAMES
            .iter()
            .find(|(name, _)| *name == game)
    }) {
        return Ok((*fixed).to_string());
    }
    let requested = requested
        .ok_or_else(|| Error::Invalid("A new password is required".to_string()))?;
    validate_password(requested)?;
    Ok(requested.to_string())
}

pub fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::Invalid("Amount must be greater than zero".to_string()));
    }
    Ok(())
}

fn has_alphabetic_run(password: &str) -> bool {
    let letters: Vec<u8> = password.bytes().map(|b| b.to_ascii_lowercase()).collect();
    letters.windows(SEQUENCE_LEN).any(|window| {
        window.iter().all(u8::is_ascii_lowercase)
            && window.windows(2).all(|pair| pair[1] == pair[0] + 1)
    })
}
