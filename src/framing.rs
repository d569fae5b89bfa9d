//! Wire framing for the two collector protocols.

use crate::credentials::Credentials;
use crate::log_line::LogLine;

/// How a log line becomes bytes on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramingStrategy {
    /// `<token><line>\n` per line, no handshake.
    Token { token: String },
    /// One `PUT` request line after connecting, then `<line>\n` per line.
    HttpPut { account_key: String, location: String },
}

impl From<&Credentials> for FramingStrategy {
    fn from(credentials: &Credentials) -> Self {
        match credentials {
            Credentials::Token(token) => FramingStrategy::Token {
                token: token.clone(),
            },
            Credentials::AccountKey { key, location } => FramingStrategy::HttpPut {
                account_key: key.clone(),
                location: location.clone(),
            },
        }
    }
}

impl FramingStrategy {
    /// Bytes written once immediately after every successful connect.
    pub fn handshake(&self) -> Option<Vec<u8>> {
        match self {
            FramingStrategy::Token { .. } => None,
            FramingStrategy::HttpPut {
                account_key,
                location,
            } => Some(
                format!("PUT /{account_key}/hosts/{location}/?realtime=1 HTTP/1.1\r\n\r\n")
                    .into_bytes(),
            ),
        }
    }

    /// Frame a single line.
    pub fn frame(&self, line: &LogLine) -> Vec<u8> {
        let prefix = match self {
            FramingStrategy::Token { token } => token.as_str(),
            FramingStrategy::HttpPut { .. } => "",
        };
        let capacity = prefix.len() + line.len() + 1;
        let mut framed = Vec::with_capacity(capacity);
        framed.extend_from_slice(prefix.as_bytes());
        framed.extend_from_slice(line.as_str().as_bytes());
        framed.push(b'\n');
        framed
    }
}
