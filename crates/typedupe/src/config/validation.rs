//! Configuration validation.

use super::TypeDedupeConfig;
use crate::core::identifier::validate_identifier;
use crate::error::{Result, TypeDedupeError};

/// Validate the configuration.
pub fn validate(config: &TypeDedupeConfig) -> Result<()> {
    let destination = &config.destination;
    if destination.max_identifier_length == 0 {
        return Err(TypeDedupeError::Config(
            "destination.max_identifier_length must be at least 1".into(),
        ));
    }
    if destination.raw_namespace.is_empty() {
        return Err(TypeDedupeError::Config(
            "destination.raw_namespace is required".into(),
        ));
    }
    if destination.default_namespace.is_empty() {
        return Err(TypeDedupeError::Config(
            "destination.default_namespace is required".into(),
        ));
    }
    validate_identifier(&destination.raw_namespace, destination.max_identifier_length)?;
    validate_identifier(&destination.default_namespace, destination.max_identifier_length)?;

    let td = &config.typing_deduping;
    if let Some(0) = td.td_threads {
        return Err(TypeDedupeError::Config(
            "typing_deduping.td_threads must be at least 1".into(),
        ));
    }
    if let Some(intervals) = &td.valve_intervals_ms {
        if intervals.is_empty() {
            return Err(TypeDedupeError::Config(
                "typing_deduping.valve_intervals_ms must not be empty".into(),
            ));
        }
        if intervals.windows(2).any(|w| w[1] < w[0]) {
            return Err(TypeDedupeError::Config(
                "typing_deduping.valve_intervals_ms must be non-decreasing".into(),
            ));
        }
    }

    Ok(())
}
