use std::fmt;

use serde::Serialize;

/// Router stages in execution order. `Done` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterStage {
    Pre,
    Intent,
    Plan,
    Executor,
    Post,
    Done,
}

impl RouterStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Intent => "intent",
            Self::Plan => "plan",
            Self::Executor => "executor",
            Self::Post => "post",
            Self::Done => "done",
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Pre => Some(Self::Intent),
            Self::Intent => Some(Self::Plan),
            Self::Plan => Some(Self::Executor),
            Self::Executor => Some(Self::Post),
            Self::Post => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for RouterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
