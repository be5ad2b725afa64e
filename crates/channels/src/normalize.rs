use crate::error::{Error, Result};

/// Normalize a raw destination identifier to the adapter's address form:
/// digits only, with the adapter-specific suffix appended.
///
/// Accepts human-entered forms like `+52 1 555 010-0100`; anything that
/// leaves no digits is rejected.
pub fn normalize_destination(destination: &str, suffix: &str) -> Result<String> {
    let digits: String = destination.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(Error::InvalidDestination {
            destination: destination.to_string(),
        });
    }
    Ok(format!("{digits}{suffix}"))
}
