use std::fmt;

use redact::Secret;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serializer;
use zeroize::Zeroizing;

/// String that is redacted when printed and zeroed when it goes out of scope.
pub struct SecureString(Zeroizing<Secret<String>>);

impl<S> From<S> for SecureString
where
    S: AsRef<str>,
{
    fn from(value: S) -> Self {
        SecureString(Zeroizing::new(Secret::new(value.as_ref().into())))
    }
}

impl SecureString {
    /// Plaintext value. Keep the borrow as short as possible.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl Clone for SecureString {
    fn clone(&self) -> Self {
        Self::from(self.expose())
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for SecureString {}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(|s| SecureString::from(Zeroizing::new(s).as_str()))
    }
}

/// Serializes the plaintext of an optional [`SecureString`]. Only meant for
/// artifacts handed to the automation runner, which get scrubbed afterwards.
///
/// # Errors
///
/// If the underlying serializer fails.
#[allow(clippy::ref_option)]
pub fn serialize_exposed<S>(value: &Option<SecureString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(secret) => serializer.serialize_some(secret.expose()),
        None => serializer.serialize_none(),
    }
}
