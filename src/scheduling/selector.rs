//! Node Selector Resolution
//!
//! Turns a claim's requested-selector annotation, or the default selector
//! configured for its storage class, into a `key=value,...` label selector.

use crate::config::DefaultSelectorTable;
use crate::domain::ports::ClaimRequest;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Selector Expression
// =============================================================================

/// Normalized equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorExpression {
    terms: Vec<(String, String)>,
}

impl SelectorExpression {
    pub fn new(terms: Vec<(String, String)>) -> Self {
        Self { terms }
    }

    /// Selector matching every node
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse a JSON object of label key to value; `null` is an empty map
    pub fn from_json_map(raw: &str) -> Result<Self> {
        let map: Option<BTreeMap<String, String>> = serde_json::from_str(raw)
            .map_err(|e| Error::SelectorParse(format!("'{}': {}", raw, e)))?;
        Ok(Self {
            terms: map.unwrap_or_default().into_iter().collect(),
        })
    }

    /// Parse a configured default selector: comma separated `"key":"value"`
    /// tokens, optionally wrapped in braces
    pub fn from_default_selector(raw: &str) -> Result<Self> {
        let strip = |s: &str| {
            s.trim_matches(|c: char| c == '"' || c == '{' || c == '}' || c.is_whitespace())
                .to_string()
        };

        let mut terms = Vec::new();
        for token in raw.split(',') {
            if strip(token).is_empty() {
                continue;
            }
            let (key, value) = token.split_once(':').ok_or_else(|| {
                Error::SelectorParse(format!("token '{}' in '{}' has no ':'", token.trim(), raw))
            })?;
            let key = strip(key);
            if key.is_empty() {
                return Err(Error::SelectorParse(format!(
                    "token '{}' in '{}' has an empty key",
                    token.trim(),
                    raw
                )));
            }
            terms.push((key, strip(value)));
        }
        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[(String, String)] {
        &self.terms
    }
}

impl fmt::Display for SelectorExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Selector Resolver
// =============================================================================

/// Picks the selector source for a claim
pub struct SelectorResolver {
    defaults: Arc<DefaultSelectorTable>,
    annotation: String,
}

impl SelectorResolver {
    /// `annotation` is the claim annotation holding the JSON selector map
    pub fn new(defaults: Arc<DefaultSelectorTable>, annotation: impl Into<String>) -> Self {
        Self {
            defaults,
            annotation: annotation.into(),
        }
    }

    /// Selector for a claim: its own annotation when set and non-empty,
    /// otherwise its storage class default, otherwise match-all
    pub fn resolve(&self, claim: &ClaimRequest) -> Result<SelectorExpression> {
        if let Some(raw) = claim.annotation(&self.annotation).filter(|raw| !raw.is_empty()) {
            let requested = SelectorExpression::from_json_map(raw)?;
            if !requested.is_empty() {
                return Ok(requested);
            }
        }

        match claim
            .storage_class
            .as_deref()
            .and_then(|class| self.defaults.get(class))
        {
            Some(default) => SelectorExpression::from_default_selector(default),
            None => Ok(SelectorExpression::everything()),
        }
    }
}
