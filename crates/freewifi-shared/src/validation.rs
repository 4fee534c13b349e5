//! Form input and the validator that turns it into a [`NetworkPayload`].
//!
//! Everything here is pure: no I/O, no clock, no store access.

use serde::Serialize;

use crate::constants::{MAX_RATING, MIN_RATING};
use crate::error::ValidationError;
use crate::models::NetworkPayload;

/// Raw values of a submitted "add network" form.
///
/// Text fields keep exactly what the user typed so a rejected submission can
/// be redisplayed unchanged. Checkboxes follow HTML semantics: present with
/// value `on` means checked, absent means unchecked.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInput {
    pub ssid: Option<String>,
    pub password: Option<String>,
    pub rating: Option<String>,
    pub has_password: bool,
    pub requires_personal_info: bool,
    pub requires_email: bool,
    pub requires_phone: bool,
    pub requires_watch_ad: bool,
}

impl FormInput {
    /// Build from decoded `application/x-www-form-urlencoded` pairs.
    ///
    /// Unknown keys are ignored. A repeated key keeps its last value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut input = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "ssid" => input.ssid = Some(value.to_string()),
                "password" => input.password = Some(value.to_string()),
                "rating" => input.rating = Some(value.to_string()),
                "hasPassword" => input.has_password = checked(value),
                "requiresPersonalInfo" => input.requires_personal_info = checked(value),
                "requiresEmail" => input.requires_email = checked(value),
                "requiresPhone" => input.requires_phone = checked(value),
                "requiresWatchAd" => input.requires_watch_ad = checked(value),
                _ => {}
            }
        }
        input
    }
}

fn checked(value: &str) -> bool {
    value.eq_ignore_ascii_case("on") || value.eq_ignore_ascii_case("true")
}

/// Validate and normalize a form submission.
///
/// Rules are checked in order and the first violation is returned:
/// 1. `ssid` must be non-empty after trimming.
/// 2. `password` must be non-empty when `hasPassword` is checked.
/// 3. `rating` must be blank (read as 0) or a finite number within
///    `MIN_RATING..=MAX_RATING`.
pub fn validate(input: &FormInput) -> Result<NetworkPayload, ValidationError> {
    let ssid = input.ssid.as_deref().unwrap_or("").trim();
    if ssid.is_empty() {
        return Err(ValidationError::SsidRequired);
    }

    let password = input.password.as_deref().unwrap_or("");
    if input.has_password && password.is_empty() {
        return Err(ValidationError::PasswordRequired);
    }

    let rating = parse_rating(input.rating.as_deref())?;

    Ok(NetworkPayload {
        ssid: ssid.to_string(),
        password: if input.has_password {
            password.to_string()
        } else {
            String::new()
        },
        rating,
        has_password: input.has_password,
        requires_personal_info: input.requires_personal_info,
        requires_email: input.requires_email,
        requires_phone: input.requires_phone,
        requires_watch_ad: input.requires_watch_ad,
    })
}

fn parse_rating(raw: Option<&str>) -> Result<f64, ValidationError> {
    let trimmed = raw.unwrap_or("").trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidRating(trimmed.to_string()))?;

    if !value.is_finite() {
        return Err(ValidationError::InvalidRating(trimmed.to_string()));
    }
    if !(MIN_RATING..=MAX_RATING).contains(&value) {
        return Err(ValidationError::RatingOutOfRange {
            value,
            min: MIN_RATING,
            max: MAX_RATING,
        });
    }
    Ok(value)
}
