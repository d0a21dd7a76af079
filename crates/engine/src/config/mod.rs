//! Configuration module for the Tramita engine.
//!
//! Configuration is loaded from environment variables using the `envy`
//! crate and resolved once at startup; subsystems consult these flags
//! instead of probing for optional collaborators at runtime.

mod engine;

pub use engine::EngineConfig;
