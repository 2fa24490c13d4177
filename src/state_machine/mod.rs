// Per-node execution state machine
//
// Every node admitted into an execution call moves pending → running →
// {succeeded | failed}, or pending → skipped without ever running.

pub mod errors;
pub mod events;
pub mod node_state_tracker;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::NodeEvent;
pub use node_state_tracker::NodeStateTracker;
pub use states::NodeState;
