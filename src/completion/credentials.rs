//! Credential validity predicates.

use regex::Regex;

/// Decides whether an API key looks usable before any request is made.
pub trait CredentialCheck: Send + Sync {
    /// True when `api_key` passes the check.
    fn is_valid(&self, api_key: &str) -> bool;
}

impl<F> CredentialCheck for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, api_key: &str) -> bool {
        self(api_key)
    }
}

/// Shape check for legacy OpenAI secret keys.
#[derive(Clone, Debug)]
pub struct OpenAiKeyPattern {
    pattern: Regex,
}

impl OpenAiKeyPattern {
    /// Pattern matched anywhere in the key.
    pub const PATTERN: &'static str = r"sk-\w{20}T3BlbkFJ\w{20}";

    /// Compile the key pattern.
    ///
    /// # Errors
    /// Returns an error if the pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(Self::PATTERN)?,
        })
    }
}

impl CredentialCheck for OpenAiKeyPattern {
    fn is_valid(&self, api_key: &str) -> bool {
        self.pattern.is_match(api_key)
    }
}
