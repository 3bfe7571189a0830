//! Generation pipeline: prompt assembly, provider attempts with retry and
//! fallback, response validation, diagnostics and audit.

pub mod audit;
pub mod controller;
pub mod diagnostic;
pub mod error;
pub mod hash;
pub mod health;
pub mod invoker;
pub mod parser;
pub mod prompt;
pub mod strategy;
pub mod types;
pub mod validator;

pub use controller::AttemptController;
pub use error::GenerationError;
pub use invoker::{ProviderError, ProviderInvoker};
pub use types::{GenerationOutcome, GenerationRequest, Purpose};
