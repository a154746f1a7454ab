//! Progressive-delivery rollout control.
//!
//! `machine` holds the pure state machine; the scheduler's per-app
//! worker drives it: ticks feed it time, the analysis engine feeds it
//! verdicts, and operator commands arrive through the same mailbox so
//! ordering against automation is total.

pub mod machine;

pub use machine::{RolloutAction, RolloutMachine};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator commands against an active rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    Pause,
    Resume,
    Abort,
    Promote,
}

impl std::str::FromStr for OperatorCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(OperatorCommand::Pause),
            "resume" => Ok(OperatorCommand::Resume),
            "abort" => Ok(OperatorCommand::Abort),
            "promote" => Ok(OperatorCommand::Promote),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

impl std::fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorCommand::Pause => write!(f, "pause"),
            OperatorCommand::Resume => write!(f, "resume"),
            OperatorCommand::Abort => write!(f, "abort"),
            OperatorCommand::Promote => write!(f, "promote"),
        }
    }
}

/// Error for unrecognized command strings.
#[derive(Debug, Clone, Error)]
#[error("unknown rollout command: {0}")]
pub struct UnknownCommand(pub String);

/// A command's precondition was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejected {
    /// There is no rollout to command.
    #[error("no active rollout")]
    NoActiveRollout,

    /// The rollout already reached a terminal phase.
    #[error("rollout already {0}")]
    Finished(drift_model::RolloutPhase),
}
