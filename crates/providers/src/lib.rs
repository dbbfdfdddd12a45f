//! Model provider implementations for Quarry.
//!
//! All providers implement the `quarry_core::Provider` trait. The router
//! selects a provider from configuration; `retry` wraps every generation
//! call; `repair` and `structured` recover schema-constrained output.

pub mod openai_compat;
pub mod repair;
pub mod retry;
pub mod router;
pub mod structured;

#[cfg(test)]
pub(crate) mod test_support;

pub use openai_compat::OpenAiCompatProvider;
pub use repair::{RepairError, repair_into, repair_json, strip_code_fences};
pub use retry::{ErrorClass, Fallback, RetryPolicy, classify, to_generation_error, with_error_handling};
pub use router::{ProviderRouter, build_from_config};
pub use structured::{OutputShape, StructuredGenerator};
