//! Secret detection for candidate facts
//!
//! Plain lowercase substring matching. It over-matches on purpose: a
//! fact about someone's "API design course" is dropped along with real keys.

/// Key substrings that mark a candidate as a secret
const KEY_MARKERS: &[&str] = &["password", "api", "token", "secret"];

/// Value substrings that mark a candidate as a secret
const VALUE_MARKERS: &[&str] = &["sk-", "api_key", "token", "password"];

/// Predicate deciding whether a candidate fact may be persisted
#[derive(Debug, Clone)]
pub struct RedactionFilter {
    key_markers: Vec<String>,
    value_markers: Vec<String>,
}

impl RedactionFilter {
    pub fn new() -> Self {
        Self {
            key_markers: KEY_MARKERS.iter().map(|m| m.to_string()).collect(),
            value_markers: VALUE_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Add key markers on top of the built-in ones
    pub fn with_key_markers(mut self, markers: impl IntoIterator<Item = String>) -> Self {
        self.key_markers.extend(Self::normalize(markers));
        self
    }

    /// Add value markers on top of the built-in ones
    pub fn with_value_markers(mut self, markers: impl IntoIterator<Item = String>) -> Self {
        self.value_markers.extend(Self::normalize(markers));
        self
    }

    fn normalize(markers: impl IntoIterator<Item = String>) -> impl Iterator<Item = String> {
        markers
            .into_iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
    }

    /// True if the candidate looks like a secret and must be dropped
    pub fn is_secret(&self, key: &str, value: &str) -> bool {
        let key = key.to_lowercase();
        let value = value.to_lowercase();

        self.key_markers.iter().any(|m| key.contains(m.as_str()))
            || self.value_markers.iter().any(|m| value.contains(m.as_str()))
    }

    pub fn allows(&self, key: &str, value: &str) -> bool {
        !self.is_secret(key, value)
    }
}

impl Default for RedactionFilter {
    fn default() -> Self {
        Self::new()
    }
}
