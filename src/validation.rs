//! Phone number validation and normalization for the address codec and
//! outbound planning.

/// Phone number validation errors with helpful messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NumberError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number is too long (maximum {max} digits)")]
    TooLong { max: usize },

    #[error("Phone number contains invalid character '{ch}'")]
    InvalidCharacter { ch: char },
}

/// Maximum digits an SMS address field can carry (TS 23.040 address-value
/// is 10 octets, two BCD digits each).
pub const MAX_ADDRESS_DIGITS: usize = 20;

/// Normalize a phone number for PDU encoding.
///
/// Strips common formatting (spaces, dashes, dots, parentheses), keeps one
/// leading `+` for international form, and rejects anything that is not a
/// decimal digit after that.
pub fn normalize_msisdn(number: &str) -> Result<String, NumberError> {
    let mut out = String::with_capacity(number.len());
    for (i, ch) in number.trim().chars().enumerate() {
        match ch {
            '+' if i == 0 => out.push('+'),
            '0'..='9' => out.push(ch),
            ' ' | '-' | '.' | '(' | ')' => {}
            other => return Err(NumberError::InvalidCharacter { ch: other }),
        }
    }
    let digits = out.strip_prefix('+').unwrap_or(&out);
    if digits.is_empty() {
        return Err(NumberError::Empty);
    }
    if digits.len() > MAX_ADDRESS_DIGITS {
        return Err(NumberError::TooLong {
            max: MAX_ADDRESS_DIGITS,
        });
    }
    Ok(out)
}

/// True when the number is in international (`+`-prefixed) form.
pub fn is_international(number: &str) -> bool {
    number.starts_with('+')
}
