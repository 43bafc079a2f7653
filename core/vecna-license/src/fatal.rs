//! The seam between detection and the terminal defense action.

use async_trait::async_trait;
use std::fmt;

/// Why the defense action fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TamperReason {
    /// The server answered with a kill flag.
    KillFlag,
    /// A tamper probe returned positive.
    Probe(&'static str),
    /// A denylisted process is running.
    Process(String),
    /// The extension reported that browser developer tools were opened.
    DevTools,
    /// The payload archive failed its digest check.
    PayloadIntegrity,
}

impl fmt::Display for TamperReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KillFlag => f.write_str("server kill flag"),
            Self::Probe(name) => write!(f, "probe: {name}"),
            Self::Process(name) => write!(f, "process: {name}"),
            Self::DevTools => f.write_str("devtools opened"),
            Self::PayloadIntegrity => f.write_str("payload integrity"),
        }
    }
}

/// A terminal action invoked on tampering.
///
/// Implementations must be idempotent and must never panic. Process
/// termination is left to the entry point.
#[async_trait]
pub trait FatalAction: Send + Sync {
    async fn trigger(&self, reason: TamperReason);
}
