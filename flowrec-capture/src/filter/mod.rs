//! Flow filtering applied before flows reach the recorder

pub mod matcher;
pub mod policy;

pub use matcher::HostMatcher;
pub use policy::{FilterDecision, FlowFilter};
