//! Input validation for subscription configuration.
//!
//! Configuration errors are rejected here, before anything is persisted.

use hookrelay_core::EventType;

use crate::error::{DeliveryError, Result};

/// Longest accepted subscription name, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Validates a destination URL.
///
/// The URL must be absolute with an `http` or `https` scheme and a host.
/// With `require_https`, plain `http` is rejected too.
///
/// # Errors
///
/// Returns `DeliveryError::InvalidUrl` describing the first problem found.
pub fn validate_url(url: &str, require_https: bool) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| DeliveryError::invalid_url(url, format!("invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {},
        "http" if !require_https => {},
        "http" => return Err(DeliveryError::invalid_url(url, "webhook URLs must use https")),
        scheme => {
            return Err(DeliveryError::invalid_url(url, format!("unsupported URL scheme: {scheme}")));
        },
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(DeliveryError::invalid_url(url, "URL must have a host")),
    }
}

/// Validates and normalizes a subscription name. Returns the trimmed name.
///
/// # Errors
///
/// Returns a validation error for a blank or overlong name.
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DeliveryError::validation("name must not be blank"));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(DeliveryError::validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validates a subscription's event types against the catalog.
///
/// Returns the list with duplicates removed, first occurrence kept.
///
/// # Errors
///
/// Returns `DeliveryError::InvalidEventTypes` for an empty list or any
/// name outside the catalog.
pub fn validate_event_types(event_types: &[String]) -> Result<Vec<String>> {
    if event_types.is_empty() {
        return Err(DeliveryError::invalid_event_types("at least one event type is required"));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(event_types.len());
    for name in event_types {
        let Some(event_type) = EventType::parse(name) else {
            return Err(DeliveryError::invalid_event_types(format!("unknown event type: {name}")));
        };
        let name = event_type.as_str().to_string();
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }

    Ok(normalized)
}
