use std::fmt;

use serde::{Deserialize, Serialize};

/// Routing label for a query. The vocabulary is open and owned by the
/// routing catalog; nothing here enumerates the valid values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intent(pub String);

impl Intent {
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Intent {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Intent {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Intent {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::Intent;

    #[test]
    fn serializes_as_a_bare_string() {
        let encoded = serde_json::to_string(&Intent::from("STORE_WIFI")).expect("encode");
        assert_eq!(encoded, "\"STORE_WIFI\"");

        let decoded: Intent = serde_json::from_str("\"RULES\"").expect("decode");
        assert!(decoded.is("RULES"));
    }
}
