use regex::Regex;

use crate::config::ConfigError;
use crate::domain::intent::{
    CostTier, IntentLabel, IntentPayload, IntentSlots, RouteCandidate, SafetyMetadata, TimeHint,
};
use crate::errors::ValidationError;

pub const ORDER_AGENT: &str = "order_agent.v1";
pub const REFUND_AGENT: &str = "refund_agent.v1";
pub const RESPONSE_AGENT: &str = "response_agent.v1";

const REFUND_KEYWORD: &str = "환불";
const ORDER_KEYWORDS: &[&str] = &["주문", "배송"];
const ORDER_TOKEN_PREFIX: &str = "ord-";
const ORDER_ID_PATTERN: &str = r"\bORD-[A-Za-z0-9]+\b";
const TOKEN_PATTERN: &str = r"[\w-]+";

/// Checked in order; the first phrase found in the text wins.
const TIME_HINTS: &[(&str, TimeHint)] = &[
    ("오늘", TimeHint::Today),
    ("어제", TimeHint::Yesterday),
    ("지난주", TimeHint::LastWeek),
    ("지난 달", TimeHint::LastMonth),
];

pub trait IntentClassifier: Send + Sync {
    fn classify(
        &self,
        masked_input: &str,
        pii_labels: &[String],
    ) -> Result<IntentPayload, ValidationError>;
}

/// Keyword rules over word tokens. Produces exactly one route candidate per
/// intent.
#[derive(Clone, Debug)]
pub struct DeterministicIntentClassifier {
    order_id: Regex,
    token: Regex,
}

impl DeterministicIntentClassifier {
    pub fn new() -> Result<Self, ConfigError> {
        let compile = |label: &str, pattern: &str| {
            Regex::new(pattern)
                .map_err(|source| ConfigError::InvalidPattern { label: label.to_string(), source })
        };
        Ok(Self {
            order_id: compile("order_id", ORDER_ID_PATTERN)?,
            token: compile("token", TOKEN_PATTERN)?,
        })
    }

    fn tokens(&self, text: &str) -> Vec<String> {
        self.token.find_iter(text).map(|token| token.as_str().to_lowercase()).collect()
    }

    fn slots(&self, text: &str) -> IntentSlots {
        IntentSlots {
            order_id: self.order_id.find(text).map(|found| found.as_str().to_string()),
            time_hint: TIME_HINTS
                .iter()
                .find(|(phrase, _)| text.contains(phrase))
                .map(|(_, hint)| *hint),
        }
    }
}

impl IntentClassifier for DeterministicIntentClassifier {
    fn classify(
        &self,
        masked_input: &str,
        pii_labels: &[String],
    ) -> Result<IntentPayload, ValidationError> {
        let tokens = self.tokens(masked_input);
        let (intent, confidence, reason) = score(&tokens);

        IntentPayload::new(
            intent,
            confidence,
            self.slots(masked_input),
            SafetyMetadata::from_labels(pii_labels),
            vec![route_for(intent)],
            reason,
        )
    }
}

fn score(tokens: &[String]) -> (IntentLabel, f64, &'static str) {
    let has = |keyword: &str| tokens.iter().any(|token| token == keyword);
    let has_order_token = tokens.iter().any(|token| token.starts_with(ORDER_TOKEN_PREFIX));

    if has(REFUND_KEYWORD) && has_order_token {
        (IntentLabel::RefundRequest, 0.92, "refund keyword with an order id")
    } else if has(REFUND_KEYWORD) {
        (IntentLabel::RefundRequest, 0.75, "refund keyword without an order id")
    } else if ORDER_KEYWORDS.iter().copied().any(|keyword| has(keyword)) {
        (IntentLabel::OrderStatus, 0.70, "order or shipping keyword")
    } else {
        (IntentLabel::Qa, 0.25, "no routing keyword matched")
    }
}

fn route_for(intent: IntentLabel) -> RouteCandidate {
    match intent {
        IntentLabel::RefundRequest => RouteCandidate {
            plan_hint: "refund_linear".to_string(),
            agents: vec![
                ORDER_AGENT.to_string(),
                REFUND_AGENT.to_string(),
                RESPONSE_AGENT.to_string(),
            ],
            est_cost: CostTier::Medium,
            notes: Some("check the order, then decide the refund".to_string()),
        },
        IntentLabel::OrderStatus | IntentLabel::Qa => RouteCandidate {
            plan_hint: "order_status".to_string(),
            agents: vec![ORDER_AGENT.to_string(), RESPONSE_AGENT.to_string()],
            est_cost: CostTier::Low,
            notes: Some("default order lookup".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DeterministicIntentClassifier, IntentClassifier, ORDER_AGENT, REFUND_AGENT, RESPONSE_AGENT,
    };
    use crate::domain::intent::{CostTier, IntentLabel, TimeHint};

    fn classifier() -> DeterministicIntentClassifier {
        DeterministicIntentClassifier::new().expect("patterns compile")
    }

    #[test]
    fn refund_with_order_id_routes_to_refund_chain() {
        let intent = classifier()
            .classify("환불 요청합니다. 주문번호는 ORD-39422 이고 지난주 결제했습니다.", &[])
            .expect("classified");

        assert_eq!(intent.intent(), IntentLabel::RefundRequest);
        assert!((intent.confidence() - 0.92).abs() < f64::EPSILON);
        assert_eq!(intent.slots().order_id.as_deref(), Some("ORD-39422"));
        assert_eq!(intent.slots().time_hint, Some(TimeHint::LastWeek));
        assert_eq!(
            intent.primary_candidate().agents,
            vec![ORDER_AGENT, REFUND_AGENT, RESPONSE_AGENT]
        );
        assert_eq!(intent.primary_candidate().est_cost, CostTier::Medium);
        assert_eq!(intent.route_candidates().len(), 1);
    }

    #[test]
    fn refund_keyword_alone_has_lower_confidence() {
        let intent = classifier().classify("환불 가능할까요", &[]).expect("classified");
        assert_eq!(intent.intent(), IntentLabel::RefundRequest);
        assert!((intent.confidence() - 0.75).abs() < f64::EPSILON);
        assert_eq!(intent.slots().order_id, None);
    }

    #[test]
    fn lowercase_order_token_counts_for_confidence_but_not_slot() {
        let intent = classifier().classify("환불 ord-77 부탁", &[]).expect("classified");
        assert!((intent.confidence() - 0.92).abs() < f64::EPSILON);
        assert_eq!(intent.slots().order_id, None);
    }

    #[test]
    fn shipping_keyword_routes_to_order_status() {
        for text in ["주문 어디쯤인가요", "배송 언제 와요"] {
            let intent = classifier().classify(text, &[]).expect("classified");
            assert_eq!(intent.intent(), IntentLabel::OrderStatus);
            assert!((intent.confidence() - 0.70).abs() < f64::EPSILON);
            assert_eq!(intent.primary_candidate().agents, vec![ORDER_AGENT, RESPONSE_AGENT]);
        }
    }

    #[test]
    fn keywords_must_be_whole_tokens() {
        let intent = classifier().classify("주문번호는 뭐였죠", &[]).expect("classified");
        assert_eq!(intent.intent(), IntentLabel::Qa);
        assert!((intent.confidence() - 0.25).abs() < f64::EPSILON);
        assert_eq!(intent.primary_candidate().plan_hint, "order_status");
    }

    #[test]
    fn time_hints_follow_priority_order() {
        let intent = classifier().classify("어제 말고 오늘 주문", &[]).expect("classified");
        assert_eq!(intent.slots().time_hint, Some(TimeHint::Today));

        let intent = classifier().classify("지난 달 주문", &[]).expect("classified");
        assert_eq!(intent.slots().time_hint, Some(TimeHint::LastMonth));
    }

    #[test]
    fn safety_metadata_carries_labels_verbatim() {
        let labels = vec!["phone".to_string()];
        let intent = classifier().classify("<PII> 로 연락 주세요", &labels).expect("classified");
        assert!(intent.safety().has_pii);
        assert_eq!(intent.safety().pii_types, labels);
    }
}
