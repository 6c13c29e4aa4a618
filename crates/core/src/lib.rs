pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod masking;
pub mod planner;
pub mod policy;
pub mod registry;
pub mod router;
pub mod telemetry;
pub mod transcript;

pub use classifier::{DeterministicIntentClassifier, IntentClassifier};
pub use config::{ConfigError, LoadOptions, RouterConfig};
pub use domain::intent::{IntentLabel, IntentPayload, IntentSlots, RouteCandidate, TimeHint};
pub use domain::plan::{Plan, PlannerNode};
pub use domain::state::RouterState;
pub use domain::Payload;
pub use errors::{RouterError, ValidationError};
pub use executor::{Backoff, ExecutionError, Executor, ExecutorError, Sleeper, TokioSleeper};
pub use masking::{MaskResult, MaskingGate};
pub use planner::PlanBuilder;
pub use policy::{PolicyGate, PolicyVerdict};
pub use registry::{Capability, CapabilityError, NodeRegistry};
pub use router::{RouteFailure, Router, RouterStage};
pub use transcript::{Transcript, TranscriptEntry};
