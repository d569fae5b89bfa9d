//! External configuration stores consulted for credential fallback.
//!
//! The shipper never discovers configuration on its own. A [`ConfigSource`]
//! is injected at construction and queried when configured credentials are
//! missing or malformed, and to resolve setting indirections (a configured
//! value that names a key in the source).

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;

/// Setting holding the log token.
pub const CONFIG_TOKEN: &str = "LOGENTRIES_TOKEN";
/// Setting holding the account key.
pub const CONFIG_ACCOUNT_KEY: &str = "LOGENTRIES_ACCOUNT_KEY";
/// Setting holding the host location.
pub const CONFIG_LOCATION: &str = "LOGENTRIES_LOCATION";

/// Read-only key/value store.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Replace `value` with the setting it names, if the source has one.
    fn substitute(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }
        self.get(value).unwrap_or_else(|| value.to_owned())
    }
}

/// Source with no settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSource;

impl ConfigSource for NoSource {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Process environment variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory settings.
#[derive(Clone, Debug, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for MapSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Settings read from an INI file.
///
/// Keys are looked up in the general (section-less) part of the file first
/// and then in the optional named section.
#[derive(Debug)]
pub struct IniSource {
    ini: Ini,
    section: Option<String>,
}

impl IniSource {
    /// Load settings from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ini::Error> {
        Ok(Self {
            ini: Ini::load_from_file(path)?,
            section: None,
        })
    }

    /// Parse settings from INI text.
    pub fn parse(text: &str) -> Result<Self, ini::ParseError> {
        Ok(Self {
            ini: Ini::load_from_str(text)?,
            section: None,
        })
    }

    /// Also consult `section` when a key is missing from the general part.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl ConfigSource for IniSource {
    fn get(&self, key: &str) -> Option<String> {
        self.ini
            .general_section()
            .get(key)
            .or_else(|| {
                self.section
                    .as_deref()
                    .and_then(|name| self.ini.section(Some(name)))
                    .and_then(|props| props.get(key))
            })
            .map(str::to_owned)
    }
}
