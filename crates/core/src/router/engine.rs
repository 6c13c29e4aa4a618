use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::{DeterministicIntentClassifier, IntentClassifier};
use crate::config::{ConfigError, RouterConfig};
use crate::domain::state::RouterState;
use crate::errors::{RouterError, ValidationError};
use crate::executor::{Executor, Sleeper};
use crate::masking::MaskingGate;
use crate::planner::PlanBuilder;
use crate::policy::{PolicyGate, PolicyVerdict, POLICY_VIOLATION_MARKER};
use crate::registry::NodeRegistry;
use crate::router::states::RouterStage;
use crate::transcript::{
    MARKER_EXECUTOR_DONE, MARKER_INTENT, MARKER_POLICY_OK, MARKER_POLICY_VIOLATION, MARKER_PRE,
};

/// A stage error ended the request. `state` is everything produced up to
/// and including the failing stage, transcript included.
#[derive(Debug, Error)]
#[error("routing failed at `{stage}` stage: {error}")]
pub struct RouteFailure {
    pub stage: RouterStage,
    #[source]
    pub error: RouterError,
    pub state: Box<RouterState>,
}

impl RouteFailure {
    fn new(stage: RouterStage, error: impl Into<RouterError>, state: RouterState) -> Self {
        Self { stage, error: error.into(), state: Box::new(state) }
    }

    pub fn category(&self) -> &'static str {
        self.error.category()
    }
}

/// Composes masking, classification, planning, execution and the policy
/// gate. Holds no per-request state, so one router serves any number of
/// concurrent requests.
pub struct Router {
    masking: MaskingGate,
    classifier: Arc<dyn IntentClassifier>,
    planner: PlanBuilder,
    executor: Executor,
    policy: PolicyGate,
}

impl Router {
    pub fn new(registry: Arc<NodeRegistry>) -> Result<Self, ConfigError> {
        Self::from_config(&RouterConfig::default(), registry)
    }

    pub fn from_config(
        config: &RouterConfig,
        registry: Arc<NodeRegistry>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            masking: MaskingGate::standard()?,
            classifier: Arc::new(DeterministicIntentClassifier::new()?),
            planner: PlanBuilder::new(config.planner.clone()),
            executor: Executor::new(registry, &config.executor),
            policy: PolicyGate::from_config(&config.policy),
        })
    }

    pub fn with_sleeper(self, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { executor: self.executor.with_sleeper(sleeper), ..self }
    }

    pub fn with_classifier(self, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self { classifier, ..self }
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.executor.registry()
    }

    pub async fn route(&self, raw_input: impl Into<String>) -> Result<RouterState, RouteFailure> {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!("route", correlation_id = %correlation_id);
        self.run(RouterState::new(raw_input)).instrument(span).await
    }

    async fn run(&self, mut state: RouterState) -> Result<RouterState, RouteFailure> {
        let mut pii_labels = Vec::new();
        let mut stage = RouterStage::Pre;

        while let Some(next) = stage.next() {
            state = match stage {
                RouterStage::Pre => {
                    let (masked, labels) = self.pre(state);
                    pii_labels = labels;
                    masked
                }
                RouterStage::Intent => self.intent(state, &pii_labels).map_err(log_failure)?,
                RouterStage::Plan => self.plan(state).map_err(log_failure)?,
                RouterStage::Executor => self.execute(state).await.map_err(log_failure)?,
                RouterStage::Post => self.post(state),
                RouterStage::Done => state,
            };
            completed(stage);
            stage = next;
        }

        info!(
            event_name = "router.request.done",
            stage = %stage,
            policy_violation = state.is_policy_violation(),
            "request routed"
        );
        Ok(state)
    }

    fn pre(&self, mut state: RouterState) -> (RouterState, Vec<String>) {
        let masked = self.masking.mask(&state.raw_input);
        state.masked_input = masked.masked;
        if masked.labels.is_empty() {
            state.transcript.stage(MARKER_PRE);
        } else {
            state.transcript.stage_with_detail(MARKER_PRE, masked.labels.join(","));
        }
        (state, masked.labels)
    }

    fn intent(
        &self,
        mut state: RouterState,
        pii_labels: &[String],
    ) -> Result<RouterState, RouteFailure> {
        let intent = match self.classifier.classify(&state.masked_input, pii_labels) {
            Ok(intent) => intent,
            Err(error) => return Err(RouteFailure::new(RouterStage::Intent, error, state)),
        };

        state.transcript.stage_with_detail(
            MARKER_INTENT,
            format!("{} ({:.2})", intent.intent(), intent.confidence()),
        );
        state.intent = Some(intent);
        Ok(state)
    }

    fn plan(&self, mut state: RouterState) -> Result<RouterState, RouteFailure> {
        let built = match &state.intent {
            Some(intent) => self.planner.build(intent),
            None => Err(ValidationError::MissingRouteCandidates),
        };
        let plan = match built {
            Ok(plan) => plan,
            Err(error) => return Err(RouteFailure::new(RouterStage::Plan, error, state)),
        };

        state.transcript.stage_with_detail(plan.plan_id(), plan.render_tree());
        state.plan = Some(plan);
        Ok(state)
    }

    async fn execute(&self, mut state: RouterState) -> Result<RouterState, RouteFailure> {
        self.seed_payload(&mut state);

        let Some(plan) = state.plan.clone() else {
            return Err(RouteFailure::new(
                RouterStage::Executor,
                ValidationError::EmptyPlan,
                state,
            ));
        };

        let seeded = state.payload.clone();
        match self.executor.execute(&plan, seeded, &mut state.transcript).await {
            Ok(payload) => {
                state.payload = payload;
                state.transcript.stage(MARKER_EXECUTOR_DONE);
                Ok(state)
            }
            Err(error) => Err(RouteFailure::new(RouterStage::Executor, error, state)),
        }
    }

    /// Seeds the keys every capability may rely on. Keys already present
    /// are left alone.
    fn seed_payload(&self, state: &mut RouterState) {
        let Some(intent) = &state.intent else {
            return;
        };

        let mut seeds = vec![
            ("query", Value::String(state.masked_input.clone())),
            ("intent", Value::String(intent.intent().as_str().to_string())),
            ("slots", json!(intent.slots())),
        ];
        if let Some(order_id) = &intent.slots().order_id {
            seeds.push(("order_id", Value::String(order_id.clone())));
        }

        for (key, value) in seeds {
            state.payload.entry(key).or_insert(value);
        }
    }

    fn post(&self, mut state: RouterState) -> RouterState {
        let verdict = self.policy.check(state.response().unwrap_or_default());
        match verdict {
            PolicyVerdict::Clean => state.transcript.stage(MARKER_POLICY_OK),
            PolicyVerdict::Violation { term } => {
                warn!(
                    event_name = "router.policy.violation",
                    term = %term,
                    "response contains a forbidden term"
                );
                state.error = Some(POLICY_VIOLATION_MARKER.to_string());
                state.transcript.stage_with_detail(MARKER_POLICY_VIOLATION, term);
            }
        }
        state
    }
}

fn completed(stage: RouterStage) {
    info!(event_name = "router.stage.completed", stage = %stage, "router stage completed");
}

fn log_failure(failure: RouteFailure) -> RouteFailure {
    warn!(
        event_name = "router.request.failed",
        stage = %failure.stage,
        category = failure.category(),
        error = %failure.error,
        "request aborted"
    );
    failure
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::Router;
    use crate::classifier::{IntentClassifier, ORDER_AGENT, REFUND_AGENT, RESPONSE_AGENT};
    use crate::domain::intent::{
        CostTier, IntentLabel, IntentPayload, IntentSlots, RouteCandidate, SafetyMetadata,
    };
    use crate::domain::Payload;
    use crate::errors::ValidationError;
    use crate::executor::Sleeper;
    use crate::registry::{Capability, CapabilityError, NodeRegistry};
    use crate::router::states::RouterStage;
    use crate::transcript::{MARKER_EXECUTOR_DONE, MARKER_INTENT, MARKER_POLICY_OK, MARKER_PRE};

    #[derive(Default)]
    struct NoSleep {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().expect("sleep log").push(duration);
        }
    }

    struct Writes(&'static str, &'static str);

    #[async_trait]
    impl Capability for Writes {
        async fn invoke(&self, mut payload: Payload) -> Result<Payload, CapabilityError> {
            payload.insert(self.0.to_string(), json!(self.1));
            Ok(payload)
        }
    }

    struct FailsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Capability for FailsOnce {
        async fn invoke(&self, mut payload: Payload) -> Result<Payload, CapabilityError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CapabilityError::Upstream("cold start".to_string()));
            }
            payload.insert("refund".to_string(), json!({"action": "approve"}));
            Ok(payload)
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Capability for AlwaysFails {
        async fn invoke(&self, _payload: Payload) -> Result<Payload, CapabilityError> {
            Err(CapabilityError::Upstream("down".to_string()))
        }
    }

    /// Remembers the name of the span each invocation ran under.
    struct SeesSpan(Arc<Mutex<Vec<Option<&'static str>>>>);

    #[async_trait]
    impl Capability for SeesSpan {
        async fn invoke(&self, payload: Payload) -> Result<Payload, CapabilityError> {
            let name = tracing::Span::current().metadata().map(|metadata| metadata.name());
            self.0.lock().expect("span log").push(name);
            Ok(payload)
        }
    }

    struct Bogus;

    impl IntentClassifier for Bogus {
        fn classify(&self, _: &str, _: &[String]) -> Result<IntentPayload, ValidationError> {
            IntentPayload::new(
                IntentLabel::Qa,
                0.5,
                IntentSlots::default(),
                SafetyMetadata::default(),
                vec![RouteCandidate {
                    plan_hint: "broken".to_string(),
                    agents: vec![],
                    est_cost: CostTier::Low,
                    notes: None,
                }],
                "always empty",
            )
        }
    }

    fn router(registry: NodeRegistry) -> Router {
        Router::new(Arc::new(registry))
            .expect("router builds")
            .with_sleeper(Arc::new(NoSleep::default()))
    }

    #[tokio::test]
    async fn order_status_request_walks_every_stage() {
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, Writes("order", "shipped"))
            .with(RESPONSE_AGENT, Writes("response", "배송 중입니다."));

        let state = router(registry).route("주문 ORD-77 배송 언제 오나요?").await.expect("routed");

        assert_eq!(
            state.transcript.markers(),
            vec![MARKER_PRE, MARKER_INTENT, "order_status", MARKER_EXECUTOR_DONE, MARKER_POLICY_OK]
        );
        assert_eq!(state.payload["query"], "주문 ORD-77 배송 언제 오나요?");
        assert_eq!(state.payload["intent"], "order_status");
        assert_eq!(state.payload["order_id"], "ORD-77");
        assert_eq!(state.response(), Some("배송 중입니다."));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn seeding_never_overwrites_capability_output() {
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, Writes("query", "rewritten"))
            .with(RESPONSE_AGENT, Writes("response", "ok"));

        let state = router(registry).route("배송 조회").await.expect("routed");
        assert_eq!(state.payload["query"], "rewritten");
    }

    #[tokio::test]
    async fn pii_is_masked_before_classification() {
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, Writes("order", "ok"))
            .with(RESPONSE_AGENT, Writes("response", "ok"));

        let state = router(registry)
            .route("배송 문의 010-1234-5678 kim@example.com")
            .await
            .expect("routed");

        assert_eq!(state.masked_input, "배송 문의 <PII> <PII>");
        assert_eq!(state.raw_input, "배송 문의 010-1234-5678 kim@example.com");
        let safety = state.intent.as_ref().expect("intent").safety().clone();
        assert!(safety.has_pii);
        assert_eq!(safety.pii_types, vec!["phone".to_string(), "email".to_string()]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_recorded() {
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, Writes("order", "ok"))
            .with(REFUND_AGENT, FailsOnce { calls: AtomicU32::new(0) })
            .with(RESPONSE_AGENT, Writes("response", "환불 완료"));

        let state = router(registry).route("환불 해주세요 ORD-1").await.expect("routed");

        let refund_attempts: Vec<(u32, bool)> = state
            .transcript
            .attempts_for("step_2")
            .map(|record| (record.attempt, record.is_failure()))
            .collect();
        assert_eq!(refund_attempts, vec![(1, true), (2, false)]);
        assert_eq!(state.payload["refund"]["action"], "approve");
    }

    #[tokio::test]
    async fn exhausted_node_returns_partial_state() {
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, AlwaysFails)
            .with(RESPONSE_AGENT, Writes("response", "never"));

        let failure = router(registry).route("배송 조회").await.expect_err("must fail");

        assert_eq!(failure.stage, RouterStage::Executor);
        assert_eq!(failure.category(), "execution");
        assert_eq!(failure.state.transcript.attempts_for("step_1").count(), 3);
        assert_eq!(failure.state.transcript.attempts_for("step_2").count(), 0);
        assert!(failure.state.plan.is_some());
        assert!(!failure.state.transcript.markers().contains(&MARKER_EXECUTOR_DONE));
        assert_eq!(failure.state.payload["intent"], "order_status");
    }

    #[tokio::test]
    async fn missing_capability_is_an_unknown_agent_failure() {
        let registry = NodeRegistry::default().with(ORDER_AGENT, Writes("order", "ok"));

        let failure = router(registry).route("배송 조회").await.expect_err("must fail");
        assert_eq!(failure.category(), "unknown_agent");
        assert_eq!(failure.state.transcript.attempts_for("step_2").count(), 1);
    }

    #[tokio::test]
    async fn invalid_plan_fails_before_execution() {
        let router = router(NodeRegistry::default()).with_classifier(Arc::new(Bogus));

        let failure = router.route("anything").await.expect_err("must fail");
        assert_eq!(failure.stage, RouterStage::Plan);
        assert_eq!(failure.category(), "validation");
        assert!(failure.state.plan.is_none());
        assert_eq!(failure.state.transcript.markers(), vec![MARKER_PRE, MARKER_INTENT]);
        assert!(failure.state.payload.is_empty());
    }

    #[tokio::test]
    async fn forbidden_term_in_response_is_flagged_not_raised() {
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, Writes("order", "ok"))
            .with(RESPONSE_AGENT, Writes("response", "데이터를 외부유출 합니다"));

        let state = router(registry).route("배송 조회").await.expect("not an error");
        assert_eq!(state.error.as_deref(), Some("정책 위반"));
        assert!(state.is_policy_violation());
        assert_eq!(state.transcript.markers().last(), Some(&"post:policy_violation"));
    }

    #[tokio::test]
    async fn capabilities_run_inside_the_route_span() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = NodeRegistry::default()
            .with(ORDER_AGENT, SeesSpan(Arc::clone(&seen)))
            .with(RESPONSE_AGENT, SeesSpan(Arc::clone(&seen)));

        router(registry).route("배송 조회").await.expect("routed");

        assert_eq!(*seen.lock().expect("span log"), vec![Some("route"), Some("route")]);
    }
}
