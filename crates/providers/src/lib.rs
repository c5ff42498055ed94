//! Transport adapters for Chatloom.
//!
//! All providers implement the `chatloom_core::Provider` trait.
//! [`ShapeFallbackProvider`] wraps any of them with the request-shape
//! fallback ladder.

pub mod fallback;
pub mod openai_compat;
pub mod resolver;

pub use fallback::{FallbackRung, ShapeFallbackProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use resolver::{ListedModelResolver, StaticModelResolver};
