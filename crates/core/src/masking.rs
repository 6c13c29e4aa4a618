//! PII masking applied to raw input before anything else sees it.

use regex::Regex;

use crate::config::ConfigError;

pub const PII_PLACEHOLDER: &str = "<PII>";

const STANDARD_DETECTORS: &[(&str, &str)] = &[
    ("ssn", r"\b\d{6}-?\d{7}\b"),
    ("phone", r"\b01[016789]-?\d{3,4}-?\d{4}\b"),
    ("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskResult {
    pub masked: String,
    pub labels: Vec<String>,
}

#[derive(Clone, Debug)]
struct Detector {
    label: String,
    pattern: Regex,
}

#[derive(Clone, Debug)]
pub struct MaskingGate {
    detectors: Vec<Detector>,
}

impl MaskingGate {
    /// Detectors for national id, mobile phone and email shapes, in that order.
    pub fn standard() -> Result<Self, ConfigError> {
        Self::with_detectors(STANDARD_DETECTORS.iter().copied())
    }

    pub fn with_detectors<'a>(
        detectors: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ConfigError> {
        let detectors = detectors
            .into_iter()
            .map(|(label, pattern)| {
                Regex::new(pattern)
                    .map(|pattern| Detector { label: label.to_string(), pattern })
                    .map_err(|source| ConfigError::InvalidPattern {
                        label: label.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { detectors })
    }

    pub fn labels(&self) -> Vec<&str> {
        self.detectors.iter().map(|detector| detector.label.as_str()).collect()
    }

    /// Replaces every match of every detector with [`PII_PLACEHOLDER`].
    /// Each matching detector's label is reported once, in declaration order.
    ///
    /// A replacement can open a new word boundary (digits glued to an email
    /// become `<PII>0101...`), so passes repeat until nothing matches. Every
    /// pass consumes digits or `@`, which the placeholder never contains.
    pub fn mask(&self, text: &str) -> MaskResult {
        let mut masked = text.to_string();
        let mut hits = vec![false; self.detectors.len()];

        loop {
            let mut changed = false;
            for (index, detector) in self.detectors.iter().enumerate() {
                if !detector.pattern.is_match(&masked) {
                    continue;
                }
                hits[index] = true;
                changed = true;
                masked = detector.pattern.replace_all(&masked, PII_PLACEHOLDER).into_owned();
            }
            if !changed {
                break;
            }
        }

        let labels = self
            .detectors
            .iter()
            .zip(hits)
            .filter(|(_, hit)| *hit)
            .map(|(detector, _)| detector.label.clone())
            .collect();
        MaskResult { masked, labels }
    }
}
