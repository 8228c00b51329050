//! # Access Key
//!
//! The 44-digit identifier of a fiscal document. Layout (left to right):
//!
//! ```text
//! UU AAMM CCCCCCCCCCCCCC MM SSS NNNNNNNNN T CCCCCCCC D
//! │  │    │              │  │   │         │ │        └ mod-11 check digit
//! │  │    │              │  │   │         │ └ numeric code
//! │  │    │              │  │   │         └ emission type
//! │  │    │              │  │   └ document number
//! │  │    │              │  └ series
//! │  │    │              └ document model
//! │  │    └ issuer tax id
//! │  └ issue year/month
//! └ state code
//! ```

use crate::constants::fiscal::{ACCESS_KEY_LENGTH, MAX_DOCUMENT_NUMBER, MAX_SERIES};
use crate::error::{FiscalError, FiscalResult};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Components used to build an access key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyParts {
    pub state_code: u8,
    pub issued_at: DateTime<Utc>,
    pub issuer_tax_id: String,
    pub model: u8,
    pub series: u32,
    pub document_number: u64,
    pub emission_type: u8,
    pub numeric_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Build a key from its components, computing the check digit
    pub fn build(parts: &AccessKeyParts) -> FiscalResult<Self> {
        if parts.state_code == 0 || parts.state_code > 99 {
            return Err(FiscalError::validation(format!(
                "state code out of range: {}",
                parts.state_code
            )));
        }
        if parts.issuer_tax_id.len() != 14 || !is_digits(&parts.issuer_tax_id) {
            return Err(FiscalError::validation(
                "issuer tax id must have exactly 14 digits",
            ));
        }
        if parts.model > 99 {
            return Err(FiscalError::validation(format!(
                "document model out of range: {}",
                parts.model
            )));
        }
        if parts.series > MAX_SERIES {
            return Err(FiscalError::validation(format!(
                "series out of range: {}",
                parts.series
            )));
        }
        if parts.document_number == 0 || parts.document_number > MAX_DOCUMENT_NUMBER {
            return Err(FiscalError::validation(format!(
                "document number out of range: {}",
                parts.document_number
            )));
        }
        if parts.emission_type > 9 {
            return Err(FiscalError::validation(format!(
                "emission type out of range: {}",
                parts.emission_type
            )));
        }
        if parts.numeric_code > 99_999_999 {
            return Err(FiscalError::validation("numeric code exceeds 8 digits"));
        }

        let body = format!(
            "{:02}{:02}{:02}{}{:02}{:03}{:09}{}{:08}",
            parts.state_code,
            parts.issued_at.year() % 100,
            parts.issued_at.month(),
            parts.issuer_tax_id,
            parts.model,
            parts.series,
            parts.document_number,
            parts.emission_type,
            parts.numeric_code,
        );
        let check = check_digit(&body);
        Ok(Self(format!("{body}{check}")))
    }

    /// Parse and validate a key (length, digits, check digit)
    pub fn parse(value: &str) -> FiscalResult<Self> {
        if value.len() != ACCESS_KEY_LENGTH {
            return Err(FiscalError::validation(format!(
                "access key must have {ACCESS_KEY_LENGTH} digits, got {}",
                value.len()
            )));
        }
        if !is_digits(value) {
            return Err(FiscalError::validation("access key must contain only digits"));
        }
        let (body, check) = value.split_at(ACCESS_KEY_LENGTH - 1);
        let expected = check_digit(body);
        if check != expected.to_string() {
            return Err(FiscalError::validation(format!(
                "access key check digit mismatch: expected {expected}, got {check}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn state_code(&self) -> u8 {
        self.digits(0, 2) as u8
    }

    pub fn issuer_tax_id(&self) -> &str {
        &self.0[6..20]
    }

    pub fn model(&self) -> u8 {
        self.digits(20, 22) as u8
    }

    pub fn series(&self) -> u32 {
        self.digits(22, 25) as u32
    }

    pub fn document_number(&self) -> u64 {
        self.digits(25, 34)
    }

    pub fn emission_type(&self) -> u8 {
        self.digits(34, 35) as u8
    }

    fn digits(&self, start: usize, end: usize) -> u64 {
        // Digits were validated on construction
        self.0[start..end].parse().unwrap_or_default()
    }
}

/// Mod-11 check digit with weights 2..=9 applied right to left
fn check_digit(body: &str) -> u32 {
    let mut weight = 2;
    let mut sum = 0;
    for c in body.chars().rev() {
        sum += c.to_digit(10).unwrap_or(0) * weight;
        weight = if weight == 9 { 2 } else { weight + 1 };
    }
    let remainder = 11 - (sum % 11);
    if remainder >= 10 {
        0
    } else {
        remainder
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccessKey {
    type Err = FiscalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = FiscalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_parts() -> AccessKeyParts {
        AccessKeyParts {
            state_code: 35,
            issued_at: Utc.with_ymd_and_hms(2024, 10, 3, 12, 0, 0).unwrap(),
            issuer_tax_id: "12345678000195".to_string(),
            model: 55,
            series: 1,
            document_number: 1,
            emission_type: 1,
            numeric_code: 12_345_678,
        }
    }

    #[test]
    fn test_build_computes_check_digit() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        assert_eq!(key.as_str(), "35241012345678000195550010000000011123456788");
        assert_eq!(key.as_str().len(), ACCESS_KEY_LENGTH);
    }

    #[test]
    fn test_component_accessors() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        assert_eq!(key.state_code(), 35);
        assert_eq!(key.issuer_tax_id(), "12345678000195");
        assert_eq!(key.model(), 55);
        assert_eq!(key.series(), 1);
        assert_eq!(key.document_number(), 1);
        assert_eq!(key.emission_type(), 1);
    }

    #[test]
    fn test_parse_validates_check_digit() {
        assert!(AccessKey::parse("35241012345678000195550010000000021876543219").is_ok());
        assert!(AccessKey::parse("35241012345678000195550010000000021876543210").is_err());
        assert!(AccessKey::parse("3524101234567800019555001").is_err());
        assert!(AccessKey::parse("3524101234567800019555001000000002187654321X").is_err());
    }

    #[test]
    fn test_build_rejects_out_of_range_components() {
        let mut parts = sample_parts();
        parts.document_number = 0;
        assert!(AccessKey::build(&parts).is_err());

        let mut parts = sample_parts();
        parts.series = 1000;
        assert!(AccessKey::build(&parts).is_err());

        let mut parts = sample_parts();
        parts.issuer_tax_id = "123".to_string();
        assert!(AccessKey::build(&parts).is_err());
    }

    #[test]
    fn test_serde_rejects_invalid_keys() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let parsed: AccessKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);

        assert!(serde_json::from_str::<AccessKey>("\"12345\"").is_err());
    }
}
