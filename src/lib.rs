//! cligate core library
//!
//! An OpenAI-protocol gateway that fronts a fleet of command-line model
//! providers. Each chat-completion request is translated into a templated
//! invocation of an external CLI process; the child's stdout is normalized
//! back into the OpenAI response shape. Failures walk a per-model fallback
//! chain while a health tracker accumulates statistics and cooldown advice.

pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod http;
pub mod jobs;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod template;
pub mod types;

mod util;

// Re-export the types most callers need
pub use error::{GatewayError, Result};
pub use registry::ProviderRegistry;
pub use types::{IncomingRequest, ProviderResult, UnifiedRequest};
