use std::sync::OnceLock;

use regex::Regex;

use crate::error::AppError;

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn require_valid_id(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must be a valid ID")));
    }
    Ok(())
}

/// A1-style range: `A1`, `A1:C50`, or bare column span `A:C`.
pub fn require_a1_range(field: &str, value: &str) -> Result<(), AppError> {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    let re = RANGE_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{1,3}[0-9]*(:[A-Za-z]{1,3}[0-9]*)?$").expect("range regex")
    });
    if !re.is_match(value.trim()) {
        return Err(AppError::Validation(format!(
            "{field} must be an A1-style range (e.g. A1:F200), got {value:?}"
        )));
    }
    Ok(())
}
