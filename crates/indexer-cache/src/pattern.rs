//! Glob patterns for invalidation rules.
//!
//! Patterns support two constructs: `*` matches any (possibly empty)
//! sequence of characters, and `{entityId}` is replaced by the ID of the
//! mutated entity. Everything else is literal. A template is parsed once
//! per rule; binding it to an entity ID only substitutes text.

/// Placeholder replaced by the entity ID when a template is bound.
pub const ENTITY_ID_PLACEHOLDER: &str = "{entityId}";

/// A parsed rule pattern, not yet bound to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTemplate {
    source: String,
    pieces: Vec<String>,
    leading_wildcard: bool,
    trailing_wildcard: bool,
}

impl PatternTemplate {
    /// Parse a pattern such as `page:{entityId}:*`.
    pub fn compile(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            pieces: pattern
                .split('*')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            leading_wildcard: pattern.starts_with('*'),
            trailing_wildcard: pattern.ends_with('*'),
        }
    }

    /// The original pattern text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute the entity ID, producing a matcher.
    pub fn bind(&self, entity_id: &str) -> KeyPattern {
        KeyPattern {
            segments: self
                .pieces
                .iter()
                .map(|p| p.replace(ENTITY_ID_PLACEHOLDER, entity_id))
                .filter(|p| !p.is_empty())
                .collect(),
            leading_wildcard: self.leading_wildcard,
            trailing_wildcard: self.trailing_wildcard,
        }
    }
}

/// A bound pattern that can be matched against cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    segments: Vec<String>,
    leading_wildcard: bool,
    trailing_wildcard: bool,
}

impl KeyPattern {
    /// Compile and bind in one step (for patterns without placeholders).
    pub fn new(pattern: &str) -> Self {
        PatternTemplate::compile(pattern).bind("")
    }

    /// The single key this pattern names, if it has no wildcard.
    pub fn as_literal(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [only] if !self.leading_wildcard && !self.trailing_wildcard => Some(only.as_str()),
            _ => None,
        }
    }

    /// Test a key against the pattern.
    pub fn matches(&self, key: &str) -> bool {
        let n = self.segments.len();
        if n == 0 {
            return self.leading_wildcard || key.is_empty();
        }

        let mut rest = key;
        for (i, seg) in self.segments.iter().enumerate() {
            let first = i == 0;
            let last = i == n - 1;

            if first && !self.leading_wildcard {
                match rest.strip_prefix(seg.as_str()) {
                    Some(tail) => rest = tail,
                    None => return false,
                }
                if last && !self.trailing_wildcard {
                    return rest.is_empty();
                }
                continue;
            }

            if last && !self.trailing_wildcard {
                return rest.ends_with(seg.as_str());
            }

            match rest.find(seg.as_str()) {
                Some(idx) => rest = &rest[idx + seg.len()..],
                None => return false,
            }
        }
        true
    }
}
