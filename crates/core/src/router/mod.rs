pub mod engine;
pub mod states;

pub use engine::{RouteFailure, Router};
pub use states::RouterStage;
