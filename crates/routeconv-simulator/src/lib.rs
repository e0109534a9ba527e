pub mod engine;
pub mod routing;
pub mod scenario_runner;
pub mod topologies;
pub mod topology;
pub mod trace;
pub mod traffic;

pub use engine::{Delivery, LinkEventSummary, Simulator};
pub use routing::{RoutingProtocol, protocol_by_name};
pub use topologies::{BuiltTopology, TopologyKind};
pub use topology::{Topology, TopologyError};
pub use trace::SimulationReport;
