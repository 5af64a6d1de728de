//! Text field checks shared by request validators.

use crate::error::ValidationError;

/// Require a non-blank value of at most `max` characters.
pub fn require_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    limit_text(field, value, max)
}

/// Reject values longer than `max` characters.
pub fn limit_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Length check for an optional field. `None` always passes.
pub fn limit_optional(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => limit_text(field, v, max),
        None => Ok(()),
    }
}

/// Minimal structural email check: one `@`, non-empty local part, dotted domain.
pub fn require_email(field: &'static str, value: &str) -> Result<(), ValidationError> {
    require_text(field, value, 180)?;
    let invalid = || ValidationError::InvalidFormat {
        field,
        reason: "must be a valid email address".to_string(),
    };
    let (local, domain) = value.trim().split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_required() {
        assert_eq!(
            require_text("name", "   ", 10),
            Err(ValidationError::Required { field: "name" })
        );
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        assert!(limit_text("name", "ñññ", 3).is_ok());
        assert!(limit_text("name", "ññññ", 3).is_err());
    }

    #[test]
    fn email_shapes() {
        assert!(require_email("email", "ana@alcaldia.gob.ve").is_ok());
        assert!(require_email("email", "ana.alcaldia.gob").is_err());
        assert!(require_email("email", "@alcaldia.gob").is_err());
        assert!(require_email("email", "ana@localhost").is_err());
        assert!(require_email("email", "a@b@c.com").is_err());
    }
}
