//! Output settings: a key/value store plus one typed extension slot.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::EngineResult;

/// Settings passed to output definitions at create and update time.
///
/// Plain values live in a JSON object. Plugins that need a structured
/// context (callback endpoints, shared state) attach it to the extension
/// slot instead of encoding it into a value.
#[derive(Clone, Default)]
pub struct OutputSettings {
    values: Map<String, Value>,
    extension: Option<Arc<dyn Any + Send + Sync>>,
}

impl OutputSettings {
    /// Empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from a JSON object.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let values: Map<String, Value> = serde_json::from_str(json)?;
        Ok(Self {
            values,
            extension: None,
        })
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Attach a typed context, replacing any previous one.
    pub fn set_extension<T: Any + Send + Sync>(&mut self, context: T) -> &mut Self {
        self.extension = Some(Arc::new(context));
        self
    }

    /// Builder form of [`OutputSettings::set_extension`].
    pub fn with_extension<T: Any + Send + Sync>(mut self, context: T) -> Self {
        self.set_extension(context);
        self
    }

    /// The attached context, if one of type `T` is present.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extension
            .as_ref()
            .and_then(|ext| Arc::clone(ext).downcast::<T>().ok())
    }

    /// Overlay `other` onto these settings.
    ///
    /// Values in `other` win. The extension is replaced only when `other`
    /// carries one.
    pub fn merge(&mut self, other: &OutputSettings) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        if let Some(ext) = &other.extension {
            self.extension = Some(Arc::clone(ext));
        }
    }

    /// Plain values as a JSON string. The extension is not serialized.
    pub fn to_json(&self) -> String {
        Value::Object(self.values.clone()).to_string()
    }
}

impl fmt::Debug for OutputSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSettings")
            .field("values", &self.values)
            .field("extension", &self.extension.is_some())
            .finish()
    }
}
