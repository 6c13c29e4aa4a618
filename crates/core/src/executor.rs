//! Sequential plan execution with per-node deadlines and bounded retries.
//!
//! Nodes run strictly one after another against a single payload. Each
//! attempt is spawned onto its own single-use tokio task so the deadline can
//! be enforced without blocking the caller. On timeout the task is aborted;
//! abort only takes effect at the capability's next `.await`, so a capability
//! that blocks its thread keeps running after the executor has moved on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn, Instrument};

use crate::config::ExecutorConfig;
use crate::domain::plan::{Plan, PlannerNode};
use crate::domain::Payload;
use crate::registry::{Capability, CapabilityError, NodeRegistry};
use crate::transcript::{AttemptOutcome, AttemptRecord, Transcript};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("capability panicked: {0}")]
    Panicked(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("node `{node_id}` references unknown agent `{agent}`")]
    UnknownAgent { node_id: String, agent: String },
    #[error("node `{node_id}` ({agent}) failed after {attempts} attempt(s): {source}")]
    Exhausted {
        node_id: String,
        agent: String,
        attempts: u32,
        #[source]
        source: ExecutionError,
    },
}

/// `delay = base * 2^attempt + uniform[0, base / 2)`, where `attempt` is 1
/// for the first retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_fraction(attempt, rand::thread_rng().gen::<f64>())
    }

    /// `fraction` in `[0, 1)` selects the jitter within the half-open window.
    pub fn delay_with_fraction(&self, attempt: u32, fraction: f64) -> Duration {
        let exponential = self.base.saturating_mul(2u32.saturating_pow(attempt));

        let half_nanos = u64::try_from(self.base.as_nanos() / 2).unwrap_or(u64::MAX);
        let mut jitter_nanos = (half_nanos as f64 * fraction.clamp(0.0, 1.0)).floor() as u64;
        if half_nanos > 0 && jitter_nanos >= half_nanos {
            jitter_nanos = half_nanos - 1;
        }

        exponential.saturating_add(Duration::from_nanos(jitter_nanos))
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct Executor {
    registry: Arc<NodeRegistry>,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl Executor {
    pub fn new(registry: Arc<NodeRegistry>, config: &ExecutorConfig) -> Self {
        Self {
            registry,
            backoff: Backoff::new(Duration::from_millis(config.base_delay_ms)),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Runs every node in plan order. The first node that exhausts its
    /// attempts aborts the plan; nothing after it runs and nothing before it
    /// is rolled back.
    pub async fn execute(
        &self,
        plan: &Plan,
        payload: Payload,
        transcript: &mut Transcript,
    ) -> Result<Payload, ExecutorError> {
        let mut payload = payload;
        for node in plan.nodes() {
            payload = self.run_node(node, payload, transcript).await?;
        }
        Ok(payload)
    }

    async fn run_node(
        &self,
        node: &PlannerNode,
        payload: Payload,
        transcript: &mut Transcript,
    ) -> Result<Payload, ExecutorError> {
        let Some(spec) = self.registry.resolve(&node.agent) else {
            let error = ExecutorError::UnknownAgent {
                node_id: node.id.clone(),
                agent: node.agent.clone(),
            };
            transcript.record_attempt(AttemptRecord {
                node_id: node.id.clone(),
                agent: node.agent.clone(),
                attempt: 1,
                elapsed_ms: 0,
                outcome: AttemptOutcome::Failed { error: error.to_string(), retry_in_ms: None },
            });
            warn!(
                event_name = "executor.node.unknown_agent",
                node_id = %node.id,
                agent = %node.agent,
                "plan references an unregistered agent"
            );
            return Err(error);
        };

        let max_attempts = node.max_attempts();
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = self.invoke(node, Arc::clone(&spec.capability), payload.clone()).await;
            let elapsed_ms = elapsed_millis(started);

            match result {
                Ok(next) => {
                    transcript.record_attempt(AttemptRecord {
                        node_id: node.id.clone(),
                        agent: node.agent.clone(),
                        attempt,
                        elapsed_ms,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    info!(
                        event_name = "executor.node.succeeded",
                        node_id = %node.id,
                        agent = %node.agent,
                        attempt,
                        elapsed_ms,
                        "node completed"
                    );
                    return Ok(next);
                }
                Err(error) => {
                    let delay = (attempt < max_attempts).then(|| self.backoff.delay(attempt));
                    transcript.record_attempt(AttemptRecord {
                        node_id: node.id.clone(),
                        agent: node.agent.clone(),
                        attempt,
                        elapsed_ms,
                        outcome: AttemptOutcome::Failed {
                            error: error.to_string(),
                            retry_in_ms: delay.map(duration_millis),
                        },
                    });
                    warn!(
                        event_name = "executor.node.attempt_failed",
                        node_id = %node.id,
                        agent = %node.agent,
                        attempt,
                        max_attempts,
                        retry_in_ms = delay.map(duration_millis),
                        error = %error,
                        "node attempt failed"
                    );

                    match delay {
                        Some(delay) => {
                            self.sleeper.sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            return Err(ExecutorError::Exhausted {
                                node_id: node.id.clone(),
                                agent: node.agent.clone(),
                                attempts: attempt,
                                source: error,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn invoke(
        &self,
        node: &PlannerNode,
        capability: Arc<dyn Capability>,
        payload: Payload,
    ) -> Result<Payload, ExecutionError> {
        let deadline = Duration::from_millis(node.timeout_ms);
        let mut worker =
            tokio::spawn(async move { capability.invoke(payload).await }.in_current_span());

        match tokio::time::timeout(deadline, &mut worker).await {
            Ok(Ok(result)) => result.map_err(ExecutionError::from),
            Ok(Err(join_error)) => Err(ExecutionError::Panicked(join_error.to_string())),
            Err(_) => {
                worker.abort();
                Err(ExecutionError::TimedOut { timeout_ms: node.timeout_ms })
            }
        }
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    duration_millis(started.elapsed())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{Backoff, ExecutionError, Executor, ExecutorError, Sleeper};
    use crate::config::ExecutorConfig;
    use crate::domain::plan::{Plan, PlannerNode};
    use crate::domain::Payload;
    use crate::registry::{Capability, CapabilityError, NodeRegistry};
    use crate::transcript::{AttemptOutcome, Transcript};

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn delays(&self) -> Vec<Duration> {
            match self.delays.lock() {
                Ok(delays) => delays.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            match self.delays.lock() {
                Ok(mut delays) => delays.push(duration),
                Err(poisoned) => poisoned.into_inner().push(duration),
            }
        }
    }

    /// Fails `failures` times, then appends its name to `visited`.
    struct Flaky {
        name: &'static str,
        failures: AtomicU32,
        calls: Arc<AtomicU32>,
    }

    impl Flaky {
        fn new(name: &'static str, failures: u32) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (Self { name, failures: AtomicU32::new(failures), calls: Arc::clone(&calls) }, calls)
        }
    }

    #[async_trait]
    impl Capability for Flaky {
        async fn invoke(&self, mut payload: Payload) -> Result<Payload, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                payload.insert("touched_by_failed_attempt".to_string(), json!(true));
                return Err(CapabilityError::Upstream(format!("{} failure #{call}", self.name)));
            }
            let visited = payload.entry("visited").or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = visited {
                items.push(json!(self.name));
            }
            Ok(payload)
        }
    }

    struct Sleepy {
        sleep: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Capability for Sleepy {
        async fn invoke(&self, payload: Payload) -> Result<Payload, CapabilityError> {
            tokio::time::sleep(self.sleep).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(payload)
        }
    }

    struct Panics;

    #[async_trait]
    impl Capability for Panics {
        async fn invoke(&self, _payload: Payload) -> Result<Payload, CapabilityError> {
            panic!("capability bug");
        }
    }

    fn plan(nodes: &[(&str, u64, u32)]) -> Plan {
        let nodes = nodes
            .iter()
            .enumerate()
            .map(|(index, (agent, timeout_ms, retries))| {
                PlannerNode::new(format!("step_{}", index + 1), *agent, *timeout_ms, *retries)
                    .expect("valid node")
            })
            .collect();
        Plan::new("test_plan", "test", nodes).expect("valid plan")
    }

    fn executor(registry: NodeRegistry, sleeper: Arc<RecordingSleeper>) -> Executor {
        Executor::new(Arc::new(registry), &ExecutorConfig { base_delay_ms: 100 })
            .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let (flaky, calls) = Flaky::new("a", 2);
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(NodeRegistry::default().with("a", flaky), Arc::clone(&sleeper));
        let mut transcript = Transcript::default();

        let payload = executor
            .execute(&plan(&[("a", 1_000, 2)]), Payload::new(), &mut transcript)
            .await
            .expect("succeeds on third attempt");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(payload["visited"], json!(["a"]));
        assert!(payload.get("touched_by_failed_attempt").is_none());

        let attempts: Vec<_> = transcript.attempts().collect();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(attempts[0].is_failure() && attempts[1].is_failure());
        assert_eq!(attempts[2].outcome, AttemptOutcome::Succeeded);

        let delays = sleeper.delays();
        assert_eq!(delays.len(), 2);
        for (retry, delay) in delays.iter().enumerate() {
            let floor = Duration::from_millis(100) * 2u32.pow(retry as u32 + 1);
            assert!(*delay >= floor && *delay < floor + Duration::from_millis(50));
            assert_eq!(attempts[retry].retry_in_ms(), Some(delay.as_millis() as u64));
        }
    }

    #[tokio::test]
    async fn exhausted_retries_abort_the_plan_with_last_error() {
        let (flaky, calls) = Flaky::new("a", 3);
        let (later, later_calls) = Flaky::new("b", 0);
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(
            NodeRegistry::default().with("a", flaky).with("b", later),
            Arc::clone(&sleeper),
        );
        let mut transcript = Transcript::default();

        let error = executor
            .execute(&plan(&[("a", 1_000, 2), ("b", 1_000, 2)]), Payload::new(), &mut transcript)
            .await
            .expect_err("three failures exceed two retries");

        assert_eq!(
            error,
            ExecutorError::Exhausted {
                node_id: "step_1".to_string(),
                agent: "a".to_string(),
                attempts: 3,
                source: ExecutionError::Capability(CapabilityError::Upstream(
                    "a failure #3".to_string()
                )),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(transcript.attempts_for("step_2").count(), 0);

        let last = transcript.attempts().last().expect("attempts recorded");
        assert_eq!(last.retry_in_ms(), None);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_a_single_attempt() {
        let (flaky, calls) = Flaky::new("a", 1);
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(NodeRegistry::default().with("a", flaky), Arc::clone(&sleeper));

        let result = executor
            .execute(&plan(&[("a", 1_000, 0)]), Payload::new(), &mut Transcript::default())
            .await;

        assert!(matches!(result, Err(ExecutorError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn unknown_agent_fails_immediately_without_retry() {
        let (later, later_calls) = Flaky::new("b", 0);
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(NodeRegistry::default().with("b", later), Arc::clone(&sleeper));
        let mut transcript = Transcript::default();

        let error = executor
            .execute(&plan(&[("ghost", 1_000, 5), ("b", 1_000, 0)]), Payload::new(), &mut transcript)
            .await
            .expect_err("ghost is not registered");

        assert_eq!(
            error,
            ExecutorError::UnknownAgent { node_id: "step_1".to_string(), agent: "ghost".to_string() }
        );
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(transcript.attempts().count(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn deadline_is_enforced_and_worker_is_abandoned() {
        let finished = Arc::new(AtomicBool::new(false));
        let sleepy = Sleepy { sleep: Duration::from_millis(300), finished: Arc::clone(&finished) };
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(NodeRegistry::default().with("slow", sleepy), sleeper);
        let mut transcript = Transcript::default();

        let started = Instant::now();
        let error = executor
            .execute(&plan(&[("slow", 50, 0)]), Payload::new(), &mut transcript)
            .await
            .expect_err("deadline elapses");
        assert!(started.elapsed() < Duration::from_millis(250));

        assert!(matches!(
            error,
            ExecutorError::Exhausted { source: ExecutionError::TimedOut { timeout_ms: 50 }, .. }
        ));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst), "aborted worker must not complete");
    }

    #[tokio::test]
    async fn panicking_capability_is_reported_as_execution_failure() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(NodeRegistry::default().with("boom", Panics), Arc::clone(&sleeper));

        let error = executor
            .execute(&plan(&[("boom", 1_000, 1)]), Payload::new(), &mut Transcript::default())
            .await
            .expect_err("panics are failures");

        assert!(matches!(
            error,
            ExecutorError::Exhausted { attempts: 2, source: ExecutionError::Panicked(_), .. }
        ));
        assert_eq!(sleeper.delays().len(), 1);
    }

    #[tokio::test]
    async fn payload_is_threaded_through_nodes_in_order() {
        let (a, _) = Flaky::new("a", 0);
        let (b, _) = Flaky::new("b", 1);
        let (c, _) = Flaky::new("c", 0);
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = executor(
            NodeRegistry::default().with("a", a).with("b", b).with("c", c),
            sleeper,
        );
        let mut transcript = Transcript::default();

        let payload = executor
            .execute(
                &plan(&[("a", 1_000, 0), ("b", 1_000, 1), ("c", 1_000, 0)]),
                Payload::new(),
                &mut transcript,
            )
            .await
            .expect("plan completes");

        assert_eq!(payload["visited"], json!(["a", "b", "c"]));
        let order: Vec<(&str, u32)> =
            transcript.attempts().map(|a| (a.node_id.as_str(), a.attempt)).collect();
        assert_eq!(order, vec![("step_1", 1), ("step_2", 1), ("step_2", 2), ("step_3", 1)]);
    }

    #[test]
    fn backoff_stays_inside_the_jitter_window() {
        let base = Duration::from_millis(250);
        let backoff = Backoff::new(base);

        for attempt in 1..=5u32 {
            let floor = base * 2u32.pow(attempt);
            let ceiling = floor + base / 2;

            assert_eq!(backoff.delay_with_fraction(attempt, 0.0), floor);
            assert!(backoff.delay_with_fraction(attempt, 0.999_999_999_999) < ceiling);
            for _ in 0..200 {
                let delay = backoff.delay(attempt);
                assert!(delay >= floor && delay < ceiling, "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn zero_base_never_sleeps() {
        let backoff = Backoff::new(Duration::ZERO);
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }
}
