//! Negotiation Assist: drafts, ranks, and gates replies to influencer
//! negotiation threads.

pub mod api;
pub mod approval;
pub mod config;
pub mod error;
pub mod llm;
pub mod negotiation;
pub mod orchestration;
pub mod service;
pub mod store;
