use routeconv_abstract::{NodeHandle, VirtualTime};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A fault action referenced a node pair that was never installed as a link.
    #[error("No link registered between {a} and {b}")]
    UnregisteredLink { a: NodeHandle, b: NodeHandle },
    #[error("Cannot register a link from {node} to itself")]
    SelfLink { node: NodeHandle },
    #[error("Unknown convergence window '{0}'")]
    UnknownWindow(String),
    #[error("Convergence window '{0}' is declared twice")]
    DuplicateWindow(String),
    #[error("{node} has no address assigned")]
    MissingAddress { node: NodeHandle },
    #[error("Action at {time} ms is after the end of the run ({end} ms)")]
    ActionAfterEnd { time: VirtualTime, end: VirtualTime },
    /// A window whose result would read as "converged instantly" without
    /// ever being opened.
    #[error("Convergence window '{0}' is never started")]
    WindowNeverStarted(String),
}
