//! URI value type used for every mesh, part, host, node and lane address
//!
//! A `Uri` is an immutable, totally ordered string value. Its kind is
//! classified once at parse time: URIs with the reserved `meta` scheme
//! address the runtime's own reflection graph, everything else is an
//! ordinary network address.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scheme reserved for introspection addresses
pub const META_SCHEME: &str = "meta";

/// Classification of a URI, decided when it is parsed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressKind {
    /// Ordinary network address
    Ordinary,
    /// Introspection address (`meta:` scheme)
    Meta,
}

/// Immutable URI value
#[derive(Clone)]
pub struct Uri {
    text: Arc<str>,
    kind: AddressKind,
}

impl Uri {
    /// The undefined URI
    pub fn empty() -> Self {
        Uri {
            text: Arc::from(""),
            kind: AddressKind::Ordinary,
        }
    }

    /// Parse a URI, classifying its address kind
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let kind = match scheme_of(text) {
            Some(scheme) if scheme.eq_ignore_ascii_case(META_SCHEME) => AddressKind::Meta,
            _ => AddressKind::Ordinary,
        };
        Uri {
            text: Arc::from(text),
            kind,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True unless this is the empty URI
    #[inline]
    pub fn is_defined(&self) -> bool {
        !self.text.is_empty()
    }

    #[inline]
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    #[inline]
    pub fn is_meta(&self) -> bool {
        self.kind == AddressKind::Meta
    }

    /// Scheme component, if any
    pub fn scheme(&self) -> Option<&str> {
        scheme_of(&self.text)
    }

    /// Authority component (`host[:port]`) of a hierarchical URI
    pub fn authority(&self) -> Option<&str> {
        let scheme = self.scheme()?;
        let rest = self.text[scheme.len() + 1..].strip_prefix("//")?;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Path component
    pub fn path(&self) -> &str {
        let rest = match self.scheme() {
            Some(scheme) => &self.text[scheme.len() + 1..],
            None => &self.text[..],
        };
        let rest = match rest.strip_prefix("//") {
            Some(hier) => match hier.find('/') {
                Some(i) => &hier[i..],
                None => "",
            },
            None => rest,
        };
        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        &rest[..end]
    }
}

fn scheme_of(text: &str) -> Option<&str> {
    let colon = text.find(':')?;
    let scheme = &text[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        Some(scheme)
    } else {
        None
    }
}

impl Default for Uri {
    fn default() -> Self {
        Uri::empty()
    }
}

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Uri {}

impl Hash for Uri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for Uri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({:?})", &*self.text)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Uri {
    fn from(text: &str) -> Self {
        Uri::parse(text)
    }
}

impl From<String> for Uri {
    fn from(text: String) -> Self {
        Uri::parse(&text)
    }
}

impl Serialize for Uri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Uri::parse(&text))
    }
}
