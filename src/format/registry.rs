//! Format registry for discovering and accessing task formats.

use std::collections::HashMap;

use crate::format::formats::{CocoFormat, NativeFormat, PngMaskFormat};
use crate::format::traits::TaskFormat;

/// Registry of available task formats.
///
/// All built-in formats are registered automatically on creation.
pub struct FormatRegistry {
    formats: HashMap<&'static str, Box<dyn TaskFormat>>,
}

impl FormatRegistry {
    /// Create a new registry with all built-in formats registered.
    pub fn new() -> Self {
        let mut registry = Self {
            formats: HashMap::new(),
        };

        registry.register(Box::new(NativeFormat));
        registry.register(Box::new(CocoFormat));
        registry.register(Box::new(PngMaskFormat));

        registry
    }

    /// Register a format implementation.
    pub fn register(&mut self, format: Box<dyn TaskFormat>) {
        self.formats.insert(format.id(), format);
    }

    /// Get a format by its ID.
    pub fn get(&self, id: &str) -> Option<&dyn TaskFormat> {
        self.formats.get(id).map(|f| f.as_ref())
    }

    /// Find formats by file extension.
    pub fn by_extension(&self, ext: &str) -> Vec<&dyn TaskFormat> {
        self.formats
            .values()
            .filter(|f| f.extensions().iter().any(|e| e.ends_with(ext)))
            .map(|f| f.as_ref())
            .collect()
    }

    /// Get all registered formats.
    pub fn all(&self) -> Vec<&dyn TaskFormat> {
        self.formats.values().map(|f| f.as_ref()).collect()
    }

    /// Get all format IDs, sorted.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.formats.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get formats that can be imported.
    pub fn import_formats(&self) -> Vec<&dyn TaskFormat> {
        self.all()
            .into_iter()
            .filter(|f| f.supports_import())
            .collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
