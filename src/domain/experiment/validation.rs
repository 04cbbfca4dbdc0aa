//! Experiment validation utilities

use std::fmt;

use thiserror::Error;

/// Maximum length for experiment, variant and tenant IDs
pub const MAX_ID_LENGTH: usize = 64;

/// Maximum length for machine names and visitor IDs
pub const MAX_NAME_LENGTH: usize = 128;

/// The kind of identifier being validated, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Experiment,
    Variant,
    Tenant,
    Visitor,
    MachineName,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Experiment => write!(f, "Experiment ID"),
            Self::Variant => write!(f, "Variant ID"),
            Self::Tenant => write!(f, "Tenant ID"),
            Self::Visitor => write!(f, "Visitor ID"),
            Self::MachineName => write!(f, "Machine name"),
        }
    }
}

/// Validation errors for experiments and variants
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("{0} cannot be empty")]
    Empty(IdKind),

    #[error("{0} exceeds maximum length of {1} characters")]
    TooLong(IdKind, usize),

    #[error("{0} must start and end with a letter or number")]
    InvalidBoundary(IdKind),

    #[error("{0} contains invalid character: '{1}'")]
    InvalidCharacter(IdKind, char),

    #[error("{0} cannot contain consecutive separators")]
    ConsecutiveSeparators(IdKind),

    #[error("Experiment must have at least 2 variants")]
    InsufficientVariants,

    #[error("Experiment must have exactly one control variant, found {0}")]
    ControlCount(usize),

    #[error("Duplicate variant ID: '{0}'")]
    DuplicateVariantId(String),

    #[error("Traffic weight for variant '{0}' must be between 0 and 100, got {1}")]
    TrafficOutOfRange(String, u32),

    #[error("Traffic weights must sum to 100, got {0}")]
    InvalidTrafficSum(u32),

    #[error("{0} must be strictly between 0 and 1, got {1}")]
    RatioOutOfRange(&'static str, f64),

    #[error("Minimum detectable effect must be positive, got {0}")]
    InvalidEffect(f64),

    #[error("Invalid experiment status transition from {0} to {1}")]
    InvalidStatusTransition(String, String),
}

impl From<ExperimentValidationError> for crate::domain::DomainError {
    fn from(err: ExperimentValidationError) -> Self {
        match err {
            ExperimentValidationError::InvalidStatusTransition(..) => Self::conflict(err.to_string()),
            ExperimentValidationError::Empty(_)
            | ExperimentValidationError::TooLong(..)
            | ExperimentValidationError::InvalidBoundary(_)
            | ExperimentValidationError::InvalidCharacter(..)
            | ExperimentValidationError::ConsecutiveSeparators(_) => {
                Self::invalid_id(err.to_string())
            }
            _ => Self::validation(err.to_string()),
        }
    }
}

/// Validate a hyphenated slug ID (experiments, variants, tenants)
pub fn validate_slug_id(kind: IdKind, id: &str) -> Result<(), ExperimentValidationError> {
    if id.is_empty() {
        return Err(ExperimentValidationError::Empty(kind));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(ExperimentValidationError::TooLong(kind, MAX_ID_LENGTH));
    }

    let starts_ok = id.starts_with(|c: char| c.is_ascii_alphanumeric());
    let ends_ok = id.ends_with(|c: char| c.is_ascii_alphanumeric());

    if !starts_ok || !ends_ok {
        return Err(ExperimentValidationError::InvalidBoundary(kind));
    }

    let mut prev_was_hyphen = false;

    for ch in id.chars() {
        match ch {
            '-' if prev_was_hyphen => {
                return Err(ExperimentValidationError::ConsecutiveSeparators(kind));
            }
            '-' => prev_was_hyphen = true,
            c if c.is_ascii_alphanumeric() => prev_was_hyphen = false,
            c => return Err(ExperimentValidationError::InvalidCharacter(kind, c)),
        }
    }

    Ok(())
}

/// Validate an experiment machine name (`homepage_cta`, `pricing_v2`)
pub fn validate_machine_name(name: &str) -> Result<(), ExperimentValidationError> {
    let kind = IdKind::MachineName;

    if name.is_empty() {
        return Err(ExperimentValidationError::Empty(kind));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(ExperimentValidationError::TooLong(kind, MAX_NAME_LENGTH));
    }

    if !name.starts_with(|c: char| c.is_ascii_lowercase()) || name.ends_with('_') {
        return Err(ExperimentValidationError::InvalidBoundary(kind));
    }

    if name.contains("__") {
        return Err(ExperimentValidationError::ConsecutiveSeparators(kind));
    }

    match name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
    {
        Some(c) => Err(ExperimentValidationError::InvalidCharacter(kind, c)),
        None => Ok(()),
    }
}

/// Validate an opaque visitor ID (cookie value, session UUID, user key)
pub fn validate_visitor_id(id: &str) -> Result<(), ExperimentValidationError> {
    let kind = IdKind::Visitor;

    if id.trim().is_empty() {
        return Err(ExperimentValidationError::Empty(kind));
    }

    if id.len() > MAX_NAME_LENGTH {
        return Err(ExperimentValidationError::TooLong(kind, MAX_NAME_LENGTH));
    }

    match id.chars().find(|c| c.is_whitespace() || c.is_control()) {
        Some(c) => Err(ExperimentValidationError::InvalidCharacter(kind, c)),
        None => Ok(()),
    }
}

/// Validate a probability-like ratio that must lie in the open interval (0, 1)
pub fn validate_ratio(name: &'static str, value: f64) -> Result<(), ExperimentValidationError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ExperimentValidationError::RatioOutOfRange(name, value))
    }
}
