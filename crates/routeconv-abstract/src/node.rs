use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a node owned by the simulation engine.
///
/// The instrumentation layer only ever references nodes through this handle;
/// it never owns engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(NodeHandle::new(3).to_string(), "node#3");
    }

    #[test]
    fn index_roundtrip() {
        assert_eq!(NodeHandle::new(7).index(), 7);
    }
}
