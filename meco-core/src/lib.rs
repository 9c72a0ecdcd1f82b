//! Meco core library — request types, validation, conversion, processing.
//!
//! Public API surface:
//! - [`types`] — [`ResourceDescriptor`], [`Payload`], [`Outcome`]
//! - [`error`] — [`CoreError`]
//! - [`validator`] — JSON syntax check
//! - [`converter`] — JSON → YAML persistence into the storage directory
//! - [`processor`] — the request pipeline tying the two together

pub mod converter;
pub mod error;
pub mod processor;
pub mod types;
pub mod validator;

pub use converter::{Converter, NORMALIZED_EXTENSION};
pub use error::CoreError;
pub use processor::Processor;
pub use types::{Outcome, Payload, ResourceDescriptor};
pub use validator::validate;
