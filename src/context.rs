//! Contextual-metadata collaborator: request-scoped attributes stamped on
//! facts at persist time, with optional validation that can veto the
//! write.

use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::errors::Errors;

/// Source of contextual attributes attached to persisted facts.
///
/// Consulted only at persist time: the current field map is validated
/// first, and an invalid context halts the append before any row is
/// written. A valid, non-empty map is stored as the entry's `meta`.
pub trait ContextSource: Send + Sync {
    /// The current contextual field map. The default is empty.
    fn current(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Validate a field map, returning field errors. The default accepts
    /// everything.
    fn validate(&self, _context: &Map<String, Value>) -> Errors {
        Errors::new()
    }
}

/// The do-nothing context source used when a stream configures none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextSource for NoContext {}

/// A [`ContextSource`] holding an explicit field map with
/// presence-required attributes.
///
/// Reference implementation for hosts that resolve their context up
/// front (and for tests); a web application would typically implement
/// [`ContextSource`] over its own request-local storage instead.
///
/// # Examples
///
/// ```
/// use factfold::{ContextSource, StaticContext};
///
/// let context = StaticContext::new()
///     .with_field("user_id", 123)
///     .require("user_id")
///     .require("action");
///
/// let errors = context.validate(&context.current());
/// assert_eq!(errors.messages_for("action"), vec!["can't be blank"]);
/// ```
#[derive(Debug, Default)]
pub struct StaticContext {
    fields: Mutex<Map<String, Value>>,
    required: Vec<String>,
}

impl StaticContext {
    /// Create an empty context with no required attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a contextual attribute.
    pub fn with_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .lock()
            .expect("context lock poisoned")
            .insert(name.into(), value.into());
        self
    }

    /// Declare an attribute that must be present and non-null.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Replace an attribute after construction. Lets tests change the
    /// ambient context between appends.
    pub fn set_field(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .lock()
            .expect("context lock poisoned")
            .insert(name.into(), value.into());
    }
}

impl ContextSource for StaticContext {
    fn current(&self) -> Map<String, Value> {
        self.fields.lock().expect("context lock poisoned").clone()
    }

    fn validate(&self, context: &Map<String, Value>) -> Errors {
        let mut errors = Errors::new();
        for name in &self.required {
            match context.get(name) {
                Some(value) if !value.is_null() => {}
                _ => errors.add(name.clone(), "can't be blank"),
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_context_is_empty_and_always_valid() {
        let source = NoContext;
        let current = source.current();
        assert!(current.is_empty());
        assert!(source.validate(&current).is_empty());
    }

    #[test]
    fn static_context_exposes_its_fields() {
        let source = StaticContext::new()
            .with_field("user_id", 123)
            .with_field("action", "debts#create");

        let current = source.current();
        assert_eq!(current["user_id"], 123);
        assert_eq!(current["action"], "debts#create");
    }

    #[test]
    fn missing_required_attribute_is_an_error() {
        let source = StaticContext::new().require("user_id");

        let errors = source.validate(&source.current());
        assert_eq!(errors.messages_for("user_id"), vec!["can't be blank"]);
    }

    #[test]
    fn null_required_attribute_is_an_error() {
        let source = StaticContext::new()
            .with_field("user_id", Value::Null)
            .require("user_id");

        let errors = source.validate(&source.current());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn present_required_attribute_passes() {
        let source = StaticContext::new()
            .with_field("user_id", 123)
            .require("user_id");

        assert!(source.validate(&source.current()).is_empty());
    }

    #[test]
    fn set_field_updates_the_ambient_context() {
        let source = StaticContext::new().require("user_id");
        assert!(!source.validate(&source.current()).is_empty());

        source.set_field("user_id", 42);
        assert!(source.validate(&source.current()).is_empty());
    }
}
