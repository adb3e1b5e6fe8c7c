//! Configuration types for the starmap index.
//!
//! Configuration can be deserialized from TOML/JSON or assembled in code.
//! All config structs validate their values at construction time via
//! fallible builders. Post-deserialization validation is available via
//! the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions. Allow `disallowed_methods` at the module level since config
// types are declarative structs with minimal procedural code.
#![allow(clippy::disallowed_methods)]

mod index;
mod query;

pub use index::*;
pub use query::*;
use snafu::Snafu;

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range or
/// violates a cross-field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}
