//! Pluggable wire formats behind one interface, keyed by a short id.
//!
//! Format is chosen once per upgrade and stored on the connection; runtime
//! switching is not supported (spec §4.1). `encode ∘ decode = id` holds for
//! the lossless formats (`edn`, `transit`) over all values representable in
//! [`crate::value::Value`]; the lossy `json` format restricts its loss to
//! keyword→string, set→array, and numeric-type collapse.

mod edn;
mod json;
mod transit;

pub use edn::EdnFormat;
pub use json::JsonFormat;
pub use transit::TransitFormat;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DecodeError, EncodeError};
use crate::value::Value;

/// A serializer/deserializer pair behind one interface.
pub trait WireFormat: Send + Sync {
    /// Short registry key, e.g. `"json"`.
    fn id(&self) -> &'static str;

    /// Human-readable name for diagnostics.
    fn display_name(&self) -> &'static str;

    /// MIME content-type tag for this format.
    fn content_type(&self) -> &'static str;

    /// Whether frames produced by this format are binary (vs. text).
    fn is_binary(&self) -> bool;

    /// Encode a value into wire bytes.
    ///
    /// # Errors
    /// Returns [`EncodeError`] if `value` cannot be represented by this
    /// format.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError>;

    /// Decode wire bytes into a value.
    ///
    /// # Errors
    /// Returns [`DecodeError`] (carrying the raw input) on malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError>;
}

/// A registry of named wire formats.
///
/// Core formats (`json`, `edn`, `transit`) are registered by
/// [`FormatRegistry::with_defaults`]; additional formats may be registered
/// at startup via [`FormatRegistry::register`].
#[derive(Clone)]
pub struct FormatRegistry {
    formats: HashMap<&'static str, Arc<dyn WireFormat>>,
}

impl FormatRegistry {
    /// An empty registry with no formats registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            formats: HashMap::new(),
        }
    }

    /// A registry pre-populated with the three core formats.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonFormat));
        registry.register(Arc::new(EdnFormat));
        registry.register(Arc::new(TransitFormat));
        registry
    }

    /// Registers (or overwrites) a format under its own id.
    pub fn register(&mut self, format: Arc<dyn WireFormat>) {
        self.formats.insert(format.id(), format);
    }

    /// Looks up a format by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn WireFormat>> {
        self.formats.get(id).cloned()
    }

    /// Returns the ids of every registered format.
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.formats.keys().copied().collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
