//! Input validation at the persistence boundary.
//!
//! Rows and inputs are checked here so malformed data is rejected before it
//! reaches a query, not downstream in the controller.

use std::fmt;

use chrono::NaiveDate;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Empty value where one is required.
    Empty(String),
    /// Value too long.
    TooLong { field: String, max: usize, actual: usize },
    /// Date string is not in `YYYY-MM-DD` form.
    InvalidDate(String),
    /// Reminder time is not in `HH:MM` form.
    InvalidTime(String),
    /// Step order is not contiguous and zero-based.
    BadStepOrder { index: usize, order: i64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} is too long ({} chars, max {})", field, actual, max)
            }
            ValidationError::InvalidDate(value) => {
                write!(f, "invalid date '{}' (expected YYYY-MM-DD)", value)
            }
            ValidationError::InvalidTime(value) => {
                write!(f, "invalid time '{}' (expected HH:MM)", value)
            }
            ValidationError::BadStepOrder { index, order } => {
                write!(f, "step at position {} has order {} (must equal position)", index, order)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Maximum allowed length for procedure and step titles.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Validate a procedure or step title.
pub fn validate_title(field: &str, title: &str) -> Result<(), ValidationError> {
    let title = title.trim();

    if title.is_empty() {
        return Err(ValidationError::Empty(field.to_string()));
    }

    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TITLE_LENGTH,
            actual: title.chars().count(),
        });
    }

    Ok(())
}

/// Parse and normalize a calendar date string.
///
/// Schedule and completion comparisons are done on the `YYYY-MM-DD` form, so
/// anything else is rejected here.
pub fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(value.to_string()))
}

/// Format a date in its normalized `YYYY-MM-DD` form.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Validate a reminder time of day (`HH:MM`, 24-hour).
pub fn validate_time_of_day(value: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidTime(value.to_string());

    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }

    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    Ok(())
}

/// Check that step orders are contiguous and zero-based.
///
/// The `order` column must match array position at persistence time.
pub fn validate_step_order(orders: &[i64]) -> Result<(), ValidationError> {
    for (index, &order) in orders.iter().enumerate() {
        if order != index as i64 {
            return Err(ValidationError::BadStepOrder { index, order });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_title() {
        assert!(validate_title("title", "Morning routine").is_ok());
        assert!(validate_title("title", "Утренний ритуал").is_ok());
        assert!(validate_title("title", "  padded  ").is_ok());

        assert!(matches!(
            validate_title("title", ""),
            Err(ValidationError::Empty(_))
        ));
        assert!(matches!(
            validate_title("title", "   "),
            Err(ValidationError::Empty(_))
        ));

        let long = "a".repeat(MAX_TITLE_LENGTH + 1);
        assert!(matches!(
            validate_title("title", &long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_parse_date() {
        let date = parse_date("2024-06-01").unwrap();
        assert_eq!(format_date(date), "2024-06-01");

        assert!(matches!(
            parse_date("01.06.2024"),
            Err(ValidationError::InvalidDate(_))
        ));
        assert!(matches!(
            parse_date("2024-06-01T10:00:00Z"),
            Err(ValidationError::InvalidDate(_))
        ));
        assert!(matches!(
            parse_date("2024-13-01"),
            Err(ValidationError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_validate_time_of_day() {
        assert!(validate_time_of_day("08:00").is_ok());
        assert!(validate_time_of_day("21:30").is_ok());
        assert!(validate_time_of_day("00:00").is_ok());
        assert!(validate_time_of_day("23:59").is_ok());

        assert!(validate_time_of_day("24:00").is_err());
        assert!(validate_time_of_day("8:00").is_err());
        assert!(validate_time_of_day("08:60").is_err());
        assert!(validate_time_of_day("0800").is_err());
        assert!(validate_time_of_day("").is_err());
    }

    #[test]
    fn test_validate_step_order() {
        assert!(validate_step_order(&[]).is_ok());
        assert!(validate_step_order(&[0]).is_ok());
        assert!(validate_step_order(&[0, 1, 2]).is_ok());

        assert!(matches!(
            validate_step_order(&[1, 2]),
            Err(ValidationError::BadStepOrder { index: 0, order: 1 })
        ));
        assert!(matches!(
            validate_step_order(&[0, 2]),
            Err(ValidationError::BadStepOrder { index: 1, order: 2 })
        ));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::Empty("title".to_string());
        assert_eq!(err.to_string(), "title cannot be empty");

        let err = ValidationError::InvalidDate("junk".to_string());
        assert_eq!(err.to_string(), "invalid date 'junk' (expected YYYY-MM-DD)");
    }
}
