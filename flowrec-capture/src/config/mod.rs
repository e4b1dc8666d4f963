//! Configuration management for the capture host

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{CommonConfig, Config, FilterConfig, FlushMode, RecorderSection};
pub use validator::ConfigValidator;
