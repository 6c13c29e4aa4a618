use crate::config::PolicyConfig;

pub const POLICY_VIOLATION_MARKER: &str = "정책 위반";
pub const DEFAULT_FORBIDDEN_TERMS: &[&str] = &["금지어", "외부유출", "파괴"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyVerdict {
    Clean,
    Violation { term: String },
}

/// Case-insensitive substring scan of the final response text.
#[derive(Clone, Debug)]
pub struct PolicyGate {
    forbidden_terms: Vec<String>,
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new(DEFAULT_FORBIDDEN_TERMS.iter().copied())
    }
}

impl PolicyGate {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let forbidden_terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        Self { forbidden_terms }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(&config.forbidden_terms)
    }

    pub fn check(&self, response: &str) -> PolicyVerdict {
        let lowered = response.to_lowercase();
        self.forbidden_terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(|term| PolicyVerdict::Violation { term: term.clone() })
            .unwrap_or(PolicyVerdict::Clean)
    }
}
