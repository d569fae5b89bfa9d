//! Credential validation gating every connection attempt.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::config::Mode;
use crate::config_source::{CONFIG_ACCOUNT_KEY, CONFIG_LOCATION, CONFIG_TOKEN, ConfigSource};

/// Message reported when no valid token could be found.
pub const INVALID_TOKEN: &str = "It appears your LOGENTRIES_TOKEN parameter is invalid!";
/// Message reported when no valid account key/location pair could be found.
pub const INVALID_HTTP_PUT: &str =
    "It appears your LOGENTRIES_ACCOUNT_KEY or LOGENTRIES_LOCATION parameters are invalid!";

/// Validated identity material for one shipper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    AccountKey { key: String, location: String },
}

impl Credentials {
    pub fn mode(&self) -> Mode {
        match self {
            Credentials::Token(_) => Mode::Token,
            Credentials::AccountKey { .. } => Mode::HttpPut,
        }
    }
}

/// Reasons credentials were rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("{}", INVALID_TOKEN)]
    InvalidToken,
    #[error("{} (account key is not a valid identifier)", INVALID_HTTP_PUT)]
    InvalidAccountKey,
    #[error("{} (location is empty)", INVALID_HTTP_PUT)]
    MissingLocation,
    #[error("{} (location contains whitespace or control characters)", INVALID_HTTP_PUT)]
    InvalidLocation,
}

/// Whether `value` is a well-formed identifier.
///
/// Hyphenated, simple, braced and URN forms are accepted.
pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty() && Uuid::try_parse(value).is_ok()
}

/// A location is spliced into the HTTP request line, so it must be a
/// single non-empty token.
fn check_location(location: &str) -> Result<(), CredentialError> {
    if location.is_empty() {
        Err(CredentialError::MissingLocation)
    } else if location.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Err(CredentialError::InvalidLocation)
    } else {
        Ok(())
    }
}

/// Checks configured credentials, falling back to a [`ConfigSource`].
#[derive(Clone)]
pub struct CredentialValidator {
    source: Arc<dyn ConfigSource>,
}

impl CredentialValidator {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    /// Boolean form of [`resolve`](Self::resolve).
    pub fn validate(&self, mode: Mode, token_or_key: &str, location: &str) -> bool {
        self.resolve(mode, token_or_key, location).is_ok()
    }

    /// Resolve credentials for `mode`.
    ///
    /// Configured values may name a setting in the source, in which case the
    /// setting's value is used. When the configured values are not valid the
    /// well-known settings are consulted before giving up.
    pub fn resolve(
        &self,
        mode: Mode,
        token_or_key: &str,
        location: &str,
    ) -> Result<Credentials, CredentialError> {
        match mode {
            Mode::Token => self.resolve_token(token_or_key),
            Mode::HttpPut => self.resolve_account_key(token_or_key, location),
        }
    }

    fn resolve_token(&self, token: &str) -> Result<Credentials, CredentialError> {
        let token = self.source.substitute(token);
        if is_valid_identifier(&token) {
            return Ok(Credentials::Token(token));
        }
        match self.source.get(CONFIG_TOKEN) {
            Some(token) if is_valid_identifier(&token) => Ok(Credentials::Token(token)),
            _ => Err(CredentialError::InvalidToken),
        }
    }

    fn resolve_account_key(
        &self,
        key: &str,
        location: &str,
    ) -> Result<Credentials, CredentialError> {
        let key = self.source.substitute(key);
        let location = self.source.substitute(location);
        let configured = if is_valid_identifier(&key) {
            check_location(&location)
        } else {
            Err(CredentialError::InvalidAccountKey)
        };
        let rejected = match configured {
            Ok(()) => return Ok(Credentials::AccountKey { key, location }),
            Err(err) => err,
        };

        let Some(key) = self
            .source
            .get(CONFIG_ACCOUNT_KEY)
            .filter(|key| is_valid_identifier(key))
        else {
            return Err(rejected);
        };
        let location = self.source.get(CONFIG_LOCATION).unwrap_or_default();
        check_location(&location)?;
        Ok(Credentials::AccountKey { key, location })
    }
}

impl std::fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_source::{MapSource, NoSource};
    use rstest::rstest;

    const KEY: &str = "4a9d6f1c-2b7e-4c1d-9a3f-5e6b7c8d9e0f";
    const OTHER: &str = "0f1e2d3c-4b5a-4968-8776-655443322110";

    fn validator(source: MapSource) -> CredentialValidator {
        CredentialValidator::new(Arc::new(source))
    }

    fn empty() -> CredentialValidator {
        CredentialValidator::new(Arc::new(NoSource))
    }

    #[rstest]
    #[case(KEY, true)]
    #[case("4a9d6f1c2b7e4c1d9a3f5e6b7c8d9e0f", true)]
    #[case("{4a9d6f1c-2b7e-4c1d-9a3f-5e6b7c8d9e0f}", true)]
    #[case("", false)]
    #[case("not-a-token", false)]
    #[case("4a9d6f1c-2b7e-4c1d-9a3f", false)]
    fn recognises_identifiers(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(is_valid_identifier(value), valid);
    }

    #[test]
    fn token_mode_accepts_valid_token() {
        assert_eq!(
            empty().resolve(Mode::Token, KEY, ""),
            Ok(Credentials::Token(KEY.into()))
        );
        assert!(empty().validate(Mode::Token, KEY, ""));
    }

    #[test]
    fn token_mode_rejects_empty_token_without_fallback() {
        assert!(!empty().validate(Mode::Token, "", ""));
        assert_eq!(
            empty().resolve(Mode::Token, "", ""),
            Err(CredentialError::InvalidToken)
        );
    }

    #[test]
    fn token_mode_falls_back_to_source() {
        let v = validator(MapSource::new().with(CONFIG_TOKEN, OTHER));
        assert_eq!(
            v.resolve(Mode::Token, "", ""),
            Ok(Credentials::Token(OTHER.into()))
        );
    }

    #[test]
    fn token_mode_rejects_malformed_fallback() {
        let v = validator(MapSource::new().with(CONFIG_TOKEN, "nope"));
        assert!(!v.validate(Mode::Token, "bad", ""));
    }

    #[test]
    fn token_indirection_uses_named_setting() {
        let v = validator(MapSource::new().with("MY_TOKEN", KEY));
        assert_eq!(
            v.resolve(Mode::Token, "MY_TOKEN", ""),
            Ok(Credentials::Token(KEY.into()))
        );
    }

    #[test]
    fn http_put_accepts_key_and_location() {
        let creds = empty()
            .resolve(Mode::HttpPut, KEY, "web-1")
            .expect("valid credentials");
        assert_eq!(
            creds,
            Credentials::AccountKey {
                key: KEY.into(),
                location: "web-1".into()
            }
        );
        assert_eq!(creds.mode(), Mode::HttpPut);
    }

    #[test]
    fn http_put_rejects_empty_location_even_with_valid_key() {
        assert!(!empty().validate(Mode::HttpPut, KEY, ""));
        assert_eq!(
            empty().resolve(Mode::HttpPut, KEY, ""),
            Err(CredentialError::MissingLocation)
        );
    }

    #[rstest]
    #[case("web 1")]
    #[case("web-1\r\nX-Injected: 1")]
    #[case("web-1\t")]
    #[case("web\u{0}1")]
    fn http_put_rejects_location_that_would_break_request_line(#[case] location: &str) {
        assert_eq!(
            empty().resolve(Mode::HttpPut, KEY, location),
            Err(CredentialError::InvalidLocation)
        );
    }

    #[test]
    fn http_put_fallback_location_is_checked_too() {
        let v = validator(
            MapSource::new()
                .with(CONFIG_ACCOUNT_KEY, OTHER)
                .with(CONFIG_LOCATION, "db 2\r\n"),
        );
        assert_eq!(
            v.resolve(Mode::HttpPut, "", ""),
            Err(CredentialError::InvalidLocation)
        );
    }

    #[test]
    fn http_put_rejects_invalid_key() {
        assert_eq!(
            empty().resolve(Mode::HttpPut, "nope", "web-1"),
            Err(CredentialError::InvalidAccountKey)
        );
    }

    #[test]
    fn http_put_fallback_requires_both_settings() {
        let key_only = validator(MapSource::new().with(CONFIG_ACCOUNT_KEY, OTHER));
        assert_eq!(
            key_only.resolve(Mode::HttpPut, "", ""),
            Err(CredentialError::MissingLocation)
        );

        let both = validator(
            MapSource::new()
                .with(CONFIG_ACCOUNT_KEY, OTHER)
                .with(CONFIG_LOCATION, "db-2"),
        );
        assert_eq!(
            both.resolve(Mode::HttpPut, "", ""),
            Ok(Credentials::AccountKey {
                key: OTHER.into(),
                location: "db-2".into()
            })
        );
    }

    #[test]
    fn http_put_fallback_rejects_empty_location_setting() {
        let v = validator(
            MapSource::new()
                .with(CONFIG_ACCOUNT_KEY, OTHER)
                .with(CONFIG_LOCATION, ""),
        );
        assert!(!v.validate(Mode::HttpPut, KEY, ""));
    }
}
