//! Type-safe identifier wrappers.
//!
//! Feature identities and cell tokens are both strings on the wire, but
//! mixing them up would silently corrupt the store's key space. Each gets
//! its own newtype so the compiler keeps them apart.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`] value.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id! {
    /// Identity of a feature. Collections hold at most one entry per id.
    FeatureId
}

define_string_id! {
    /// Token of one S2 cell; doubles as the store key for that cell's
    /// collection.
    CellToken
}

impl CellToken {
    /// The token as store key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Numeric spatial reference system identifier (EPSG code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Srid(pub u32);

impl Srid {
    /// Spherical Web Mercator, metres.
    pub const WEB_MERCATOR: Self = Self(3857);

    /// WGS84 geographic, degrees.
    pub const WGS84: Self = Self(4326);

    /// Return the inner EPSG code.
    pub const fn into_inner(self) -> u32 {
        self.0
    }
}

impl Default for Srid {
    fn default() -> Self {
        Self::WEB_MERCATOR
    }
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}
