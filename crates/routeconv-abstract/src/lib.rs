pub mod config;
pub mod flow;
pub mod interface;
pub mod node;
pub mod scenario;

pub use config::SimConfig;
pub use flow::{FiveTuple, FlowCounters, FlowId};
pub use interface::{Callback, SimulationContext};
pub use node::NodeHandle;
pub use scenario::{ScenarioAction, ScenarioAssertion, ScenarioFile, SimConfigOverride};

/// Virtual time, in milliseconds since the start of the run.
pub type VirtualTime = u64;
