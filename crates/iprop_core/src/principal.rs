//! Principal names and their on-log encoding.
//!
//! A principal is stored as
//!
//! ```text
//! [name_type: u32][component count: u32][realm: u32 len + bytes]
//! [component: u32 len + bytes]...
//! ```
//!
//! all big-endian.

use crate::bytes::{put_data, put_u32, ByteReader};
use crate::error::{LogError, LogResult};
use std::fmt;
use std::str::FromStr;

/// Name type of an ordinary user or host principal.
pub const NT_PRINCIPAL: u32 = 1;

/// A Kerberos principal name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Principal {
    /// Name type.
    pub name_type: u32,
    /// Realm.
    pub realm: String,
    /// Name components, e.g. `["host", "kdc.example.com"]`.
    pub components: Vec<String>,
}

impl Principal {
    /// Creates a principal of type [`NT_PRINCIPAL`].
    #[must_use]
    pub fn new<I, S>(realm: impl Into<String>, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name_type: NT_PRINCIPAL,
            realm: realm.into(),
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends the encoded principal to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        put_u32(buf, self.name_type);
        put_u32(buf, self.components.len() as u32);
        put_data(buf, self.realm.as_bytes());
        for component in &self.components {
            put_data(buf, component.as_bytes());
        }
    }

    /// Encodes the principal.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a principal from the reader's current position.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a short or malformed buffer.
    pub fn decode_from(reader: &mut ByteReader<'_>) -> LogResult<Self> {
        let name_type = reader.u32()?;
        let count = reader.u32()? as usize;
        // Each component needs at least its length word.
        if count > reader.remaining() / 4 {
            return Err(LogError::invalid_payload(format!(
                "principal claims {count} components"
            )));
        }
        let realm = reader.string()?;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            components.push(reader.string()?);
        }
        Ok(Self {
            name_type,
            realm,
            components,
        })
    }

    /// Decodes a principal that must span all of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a malformed buffer or
    /// trailing bytes.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let principal = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(principal)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

impl FromStr for Principal {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, realm) = s
            .rsplit_once('@')
            .ok_or_else(|| LogError::invalid_argument(format!("principal {s:?} has no realm")))?;
        if name.is_empty() || realm.is_empty() {
            return Err(LogError::invalid_argument(format!(
                "principal {s:?} has an empty name or realm"
            )));
        }
        Ok(Self::new(realm, name.split('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p: Principal = "host/kdc.example.com@EXAMPLE.COM".parse().unwrap();
        assert_eq!(p.realm, "EXAMPLE.COM");
        assert_eq!(p.components, vec!["host", "kdc.example.com"]);
        assert_eq!(p.to_string(), "host/kdc.example.com@EXAMPLE.COM");
    }

    #[test]
    fn parse_rejects_missing_realm() {
        assert!("alice".parse::<Principal>().is_err());
        assert!("@EXAMPLE.COM".parse::<Principal>().is_err());
        assert!("alice@".parse::<Principal>().is_err());
    }

    #[test]
    fn encoding_layout() {
        let p = Principal::new("R", ["a"]);
        assert_eq!(
            p.encode(),
            vec![0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, b'R', 0, 0, 0, 1, b'a']
        );
    }

    #[test]
    fn decode_encoded() {
        let p = Principal::new("EXAMPLE.COM", ["kadmin", "admin"]);
        assert_eq!(Principal::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn decode_rejects_absurd_component_count() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 1);
        put_u32(&mut buf, 1_000_000);
        put_data(&mut buf, b"R");
        assert!(Principal::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut buf = Principal::new("R", ["a"]).encode();
        buf.push(0);
        assert!(Principal::decode(&buf).is_err());
    }
}
