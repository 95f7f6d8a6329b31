//! `SNWS2` signing key derivation and signature computation.
//!
//! The signing flow is:
//!
//! 1. Derive a signing key from the token secret and the request's UTC
//!    calendar date. The key is valid for every request issued that day.
//! 2. Build the signature data from the request timestamp and the SHA-256
//!    of the canonical request.
//! 3. Sign the signature data with HMAC-SHA256 and hex-encode the result.
//!
//! ```text
//! DateKey    = HMAC-SHA256("SNWS2" + secret, "YYYYMMDD")
//! SigningKey = HMAC-SHA256(DateKey, "snws2_request")
//! Signature  = hex(HMAC-SHA256(SigningKey, SignatureData))
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Authorization scheme name.
pub const SCHEME: &str = "SNWS2";

/// Algorithm identifier that opens the signature data.
pub const ALGORITHM: &str = "SNWS2-HMAC-SHA256";

/// Fixed scope string of the second key derivation step.
pub const SIGNING_SCOPE: &str = "snws2_request";

/// Hex SHA-256 of the empty string.
pub const EMPTY_STRING_SHA256_HEX: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Number of days a saved signing key remains valid.
pub const SIGNING_KEY_VALIDITY_DAYS: i64 = 7;

type HmacSha256 = Hmac<Sha256>;

/// A derived signing key together with its expiration.
///
/// The key bytes are redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    key: Vec<u8>,
    expiration: DateTime<Utc>,
}

impl SigningKey {
    /// Wrap key material obtained for `date`.
    ///
    /// The key expires [`SIGNING_KEY_VALIDITY_DAYS`] after `date`, truncated
    /// to midnight UTC.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, date: &DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            expiration: signing_key_expiration(date),
        }
    }

    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// The key as lower-case hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.key)
    }

    /// When the key stops being valid.
    #[must_use]
    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// Whether the key is still valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: &DateTime<Utc>) -> bool {
        *now < self.expiration
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key", &"...")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Expiration of a signing key obtained at `date`: seven days later,
/// floored to 00:00:00.000 UTC.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
///
/// use solarnet_auth::signing::signing_key_expiration;
///
/// let date = Utc.with_ymd_and_hms(2024, 1, 10, 15, 30, 0).unwrap();
/// let exp = signing_key_expiration(&date);
/// assert_eq!(exp, Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap());
/// ```
#[must_use]
pub fn signing_key_expiration(date: &DateTime<Utc>) -> DateTime<Utc> {
    let later = *date + Duration::days(SIGNING_KEY_VALIDITY_DAYS);
    later.date_naive().and_hms_opt(0, 0, 0).map_or(later, |midnight| midnight.and_utc())
}

/// Derive the signing key for `date` from a token secret.
#[must_use]
pub fn compute_signing_key(secret: &str, date: &DateTime<Utc>) -> Vec<u8> {
    let date_key = hmac_sha256(
        format!("{SCHEME}{secret}").as_bytes(),
        iso8601_date(date).as_bytes(),
    );
    hmac_sha256(&date_key, SIGNING_SCOPE.as_bytes())
}

/// Build the data to sign for a canonical request issued at `date`.
///
/// ```text
/// SNWS2-HMAC-SHA256\n
/// <YYYYMMDD'T'HHMMSS'Z'>\n
/// <hex(SHA256(canonical_request))>
/// ```
#[must_use]
pub fn compute_signature_data(canonical_request: &str, date: &DateTime<Utc>) -> String {
    format!(
        "{ALGORITHM}\n{}\n{}",
        iso8601_timestamp(date),
        sha256_hex(canonical_request.as_bytes())
    )
}

/// Compute the hex-encoded HMAC-SHA256 signature of `data` with `signing_key`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// Assemble the `Authorization` header value.
#[must_use]
pub fn authorization_header_value(token_id: &str, signed_headers: &[String], signature: &str) -> String {
    format!(
        "{SCHEME} Credential={token_id},SignedHeaders={},Signature={signature}",
        signed_headers.join(";")
    )
}

/// HMAC-SHA256 of `data` keyed with `key`.
#[must_use]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as KeyInit>::new_from_slice(key).expect("HMAC can accept any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// SHA-256 of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Lower-case hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compact ISO 8601 calendar date (`YYYYMMDD`) in UTC.
#[must_use]
pub fn iso8601_date(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%d").to_string()
}

/// Compact ISO 8601 timestamp (`YYYYMMDD'T'HHMMSS'Z'`) in UTC.
#[must_use]
pub fn iso8601_timestamp(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%SZ").to_string()
}

/// HTTP date string (`Tue, 25 Apr 2017 14:30:00 GMT`), as sent in the
/// `Date` or `X-SN-Date` header.
#[must_use]
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn test_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 25, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_should_format_dates() {
        let date = test_date();
        assert_eq!(iso8601_date(&date), "20170425");
        assert_eq!(iso8601_timestamp(&date), "20170425T143000Z");
        assert_eq!(format_http_date(&date), "Tue, 25 Apr 2017 14:30:00 GMT");
    }

    #[test]
    fn test_should_derive_key_in_two_steps() {
        let date = test_date();
        let step1 = hmac_sha256(b"SNWS2secret", b"20170425");
        let expected = hmac_sha256(&step1, b"snws2_request");
        assert_eq!(compute_signing_key("secret", &date), expected);
        assert_eq!(expected.len(), 32);
    }

    #[test]
    fn test_should_derive_same_key_all_day() {
        let morning = Utc.with_ymd_and_hms(2017, 4, 25, 0, 0, 1).unwrap();
        let night = Utc.with_ymd_and_hms(2017, 4, 25, 23, 59, 59).unwrap();
        let next_day = Utc.with_ymd_and_hms(2017, 4, 26, 0, 0, 0).unwrap();
        assert_eq!(
            compute_signing_key("s", &morning),
            compute_signing_key("s", &night)
        );
        assert_ne!(
            compute_signing_key("s", &night),
            compute_signing_key("s", &next_day)
        );
    }

    #[test]
    fn test_should_match_hmac_test_vector() {
        // RFC 4231 test case 2.
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_should_build_signature_data() {
        let data = compute_signature_data("", &test_date());
        assert_eq!(
            data,
            format!("SNWS2-HMAC-SHA256\n20170425T143000Z\n{EMPTY_STRING_SHA256_HEX}")
        );
    }

    #[test]
    fn test_should_hash_empty_string() {
        assert_eq!(sha256_hex(b""), EMPTY_STRING_SHA256_HEX);
    }

    #[test]
    fn test_should_expire_key_at_midnight_seven_days_later() {
        let date = Utc.with_ymd_and_hms(2024, 1, 10, 15, 30, 0).unwrap();
        let key = SigningKey::new(vec![1, 2, 3], &date);
        assert_eq!(
            key.expiration(),
            Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap()
        );
        assert!(key.is_valid_at(&Utc.with_ymd_and_hms(2024, 1, 16, 23, 59, 59).unwrap()));
        assert!(!key.is_valid_at(&Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap()));
        assert!(!key.is_valid_at(&Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 1).unwrap()));
    }

    #[test]
    fn test_should_redact_key_in_debug() {
        let key = SigningKey::new(vec![0xde, 0xad], &test_date());
        let debug = format!("{key:?}");
        assert!(!debug.contains("222"));
        assert!(!debug.contains("dead"));
        assert_eq!(key.to_hex(), "dead");
    }

    #[test]
    fn test_should_format_authorization_header() {
        let header = authorization_header_value(
            "token",
            &["date".to_owned(), "host".to_owned()],
            "abc123",
        );
        assert_eq!(
            header,
            "SNWS2 Credential=token,SignedHeaders=date;host,Signature=abc123"
        );
    }
}
