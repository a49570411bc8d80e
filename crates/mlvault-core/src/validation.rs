//! # Schema Validation
//!
//! Field-level checks shared by every document kind.
//!
//! Validation runs before any write reaches a backend. A failing check
//! returns `VaultError::Validation` naming the offending field, and nothing
//! is written. The only check that may rewrite a value instead of rejecting
//! it is the rate-metric check under [`RatePolicy::Clamp`].

use crate::primitives::{MAX_ID_LENGTH, MAX_LABEL_LENGTH, MAX_TEXT_LENGTH};
use crate::VaultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to do with a rate metric outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePolicy {
    /// Reject the write.
    #[default]
    Reject,
    /// Clamp the value into range and accept the write.
    Clamp,
}

/// Tunable parts of validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationPolicy {
    #[serde(default)]
    pub rate_metrics: RatePolicy,
}

/// Identifier: non-empty, bounded, `[A-Za-z0-9_.:-]` only.
pub fn check_id(field: &str, value: &str) -> Result<(), VaultError> {
    if value.is_empty() {
        return Err(VaultError::validation(field, "must not be empty"));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(VaultError::validation(
            field,
            format!("longer than {} bytes", MAX_ID_LENGTH),
        ));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
    {
        return Err(VaultError::validation(
            field,
            format!("invalid character {:?}", bad),
        ));
    }
    Ok(())
}

/// Required short label: non-blank and bounded.
pub fn check_label(field: &str, value: &str) -> Result<(), VaultError> {
    if value.trim().is_empty() {
        return Err(VaultError::validation(field, "must not be empty"));
    }
    check_label_length(field, value)
}

/// Optional short label: may be empty, must be bounded.
pub fn check_label_length(field: &str, value: &str) -> Result<(), VaultError> {
    if value.len() > MAX_LABEL_LENGTH {
        return Err(VaultError::validation(
            field,
            format!("longer than {} bytes", MAX_LABEL_LENGTH),
        ));
    }
    Ok(())
}

/// Free-form text: bounded.
pub fn check_text(field: &str, value: &str) -> Result<(), VaultError> {
    if value.len() > MAX_TEXT_LENGTH {
        return Err(VaultError::validation(
            field,
            format!("longer than {} bytes", MAX_TEXT_LENGTH),
        ));
    }
    Ok(())
}

/// Any stored float must be finite.
pub fn check_finite(field: &str, value: f64) -> Result<(), VaultError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(VaultError::validation(field, "must be a finite number"))
    }
}

/// Finite and non-negative.
pub fn check_non_negative(field: &str, value: f64) -> Result<(), VaultError> {
    check_finite(field, value)?;
    if value < 0.0 {
        return Err(VaultError::validation(field, "must not be negative"));
    }
    Ok(())
}

/// Finite and inside `[lo, hi]`.
pub fn check_range(field: &str, value: f64, lo: f64, hi: f64) -> Result<(), VaultError> {
    check_finite(field, value)?;
    if value < lo || value > hi {
        return Err(VaultError::validation(
            field,
            format!("{} is outside [{}, {}]", value, lo, hi),
        ));
    }
    Ok(())
}

/// Rate metric in `[0, 1]`, rejected or clamped according to `policy`.
pub fn check_rate(field: &str, value: &mut f64, policy: &ValidationPolicy) -> Result<(), VaultError> {
    check_finite(field, *value)?;
    if (0.0..=1.0).contains(&*value) {
        return Ok(());
    }
    match policy.rate_metrics {
        RatePolicy::Reject => Err(VaultError::validation(
            field,
            format!("{} is outside [0, 1]", value),
        )),
        RatePolicy::Clamp => {
            tracing::debug!(field, value = *value, "clamping rate metric");
            *value = value.clamp(0.0, 1.0);
            Ok(())
        }
    }
}

/// `updated_at` must never precede `created_at`.
pub fn check_timestamps(created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Result<(), VaultError> {
    if updated_at < created_at {
        return Err(VaultError::validation(
            "updated_at",
            format!("{} precedes created_at {}", updated_at, created_at),
        ));
    }
    Ok(())
}

/// Minimal structural email check: one `@`, non-empty local part, dotted domain.
pub fn check_email(value: &str) -> Result<(), VaultError> {
    check_label("email", value)?;
    let trimmed = value.trim();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return Err(VaultError::validation("email", "missing `@`"));
    };
    if local.is_empty() || domain.contains('@') || trimmed.contains(char::is_whitespace) {
        return Err(VaultError::validation("email", "malformed address"));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(VaultError::validation("email", "domain must be dotted"));
    }
    Ok(())
}

/// Reject an attempt to change a field that is fixed after creation.
pub fn check_unchanged<T: PartialEq>(field: &str, before: &T, after: &T) -> Result<(), VaultError> {
    if before == after {
        Ok(())
    } else {
        Err(VaultError::validation(field, "cannot change after creation"))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ids_accept_tracking_style_names() {
        assert!(check_id("model_id", "model_12345").is_ok());
        assert!(check_id("run_id", "exp-123:run.001").is_ok());
    }

    #[test]
    fn ids_reject_empty_and_whitespace() {
        assert!(check_id("model_id", "").is_err());
        let err = check_id("model_id", "model 1").unwrap_err();
        assert!(matches!(err, VaultError::Validation { ref field, .. } if field == "model_id"));
    }

    #[test]
    fn rate_rejected_by_default() {
        let mut value = 1.2;
        let err = check_rate("accuracy", &mut value, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(value, 1.2);
    }

    #[test]
    fn rate_clamped_when_configured() {
        let policy = ValidationPolicy {
            rate_metrics: RatePolicy::Clamp,
        };
        let mut high = 1.2;
        let mut low = -0.01;
        check_rate("recall", &mut high, &policy).unwrap();
        check_rate("recall", &mut low, &policy).unwrap();
        assert_eq!(high, 1.0);
        assert_eq!(low, 0.0);
    }

    #[test]
    fn nan_is_never_clamped() {
        let policy = ValidationPolicy {
            rate_metrics: RatePolicy::Clamp,
        };
        let mut value = f64::NAN;
        assert!(check_rate("precision", &mut value, &policy).is_err());
    }

    #[test]
    fn updated_before_created_rejected() {
        let now = Utc::now();
        assert!(check_timestamps(now, now).is_ok());
        assert!(check_timestamps(now, now - Duration::seconds(1)).is_err());
    }

    #[test]
    fn email_shapes() {
        assert!(check_email("ryan@example.com").is_ok());
        assert!(check_email("ryan@localhost").is_err());
        assert!(check_email("ryan.example.com").is_err());
        assert!(check_email("a@b@example.com").is_err());
        assert!(check_email("").is_err());
    }
}
