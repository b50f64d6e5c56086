/// Implements a base58check-encoded hash newtype over a `String`.
///
/// The node hands these around as strings, so the encoded form is what gets
/// stored and compared. `from_digest` is the only path that computes one.
macro_rules! impl_b58_hash {
    ($name:ident, $prefix:expr) => {
        impl $name {
            pub const PREFIX: &'static [u8] = $prefix;

            /// Wraps an already-encoded hash without checking it.
            pub fn new(encoded: impl Into<String>) -> Self {
                Self(encoded.into())
            }

            /// Encodes a raw 32-byte digest.
            pub fn from_digest(digest: &[u8; 32]) -> Self {
                Self($crate::hash::encode_b58check(Self::PREFIX, digest))
            }

            /// Decodes back to the raw digest, checking the prefix.
            pub fn to_digest(&self) -> Result<[u8; 32], $crate::hash::HashError> {
                let raw = $crate::hash::decode_b58check(Self::PREFIX, &self.0)?;
                raw.as_slice()
                    .try_into()
                    .map_err(|_| $crate::hash::HashError::Length(raw.len()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
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
