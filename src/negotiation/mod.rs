//! Negotiation pipeline stages: context loading, analysis, drafting,
//! scoring, and the template fallback.

pub mod analyzer;
pub mod context;
pub mod fallback;
mod json;
pub mod model;
pub mod scorer;
pub mod strategy;

pub use analyzer::ThreadAnalyzer;
pub use context::{ContextLoader, NegotiationContext};
pub use fallback::FallbackTemplateEngine;
pub use scorer::PatternScorer;
pub use strategy::{GeneratorConfig, Generation, ReplyStrategyGenerator};
