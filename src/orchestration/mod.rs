//! Orchestration: state machine, specialist roster, and the manager that
//! drives a message through them.

pub mod manager;
pub mod result;
pub mod serializer;
pub mod specialist;
pub mod state;

pub use manager::{InboundRequest, Orchestrated, OrchestrationManager};
pub use result::{CapabilityGap, DiagnosticTrace, OrchestrationResult, ProcessingType};
pub use serializer::ThreadSerializer;
pub use specialist::{Specialist, SpecialistRegistry, SpecialistRole};
pub use state::{OrchestrationState, RunState};
