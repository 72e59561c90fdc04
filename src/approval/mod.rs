//! Approval gate: policy-driven auto-send vs. human review.

pub mod gate;
pub mod model;
pub mod policy;

pub use gate::{ApprovalGate, GateRuling, SweepReport};
pub use model::{ApprovalDecision, ClosedBy, Disposition};
pub use policy::{ApprovalPolicy, AutoReplyConditions, ReplyMode, TimeoutAction};
