//! Field-level validation errors attached to facts and read states.
//!
//! A [`FieldError`] names the offending field (or [`BASE`] for errors that
//! belong to the record as a whole) and carries a human-readable message.
//! [`Errors`] is the ordered collection the engine accumulates them in.

use serde::{Deserialize, Serialize};

/// Pseudo-field for errors that apply to the record as a whole rather
/// than to a single field.
pub const BASE: &str = "base";

/// A single validation error attributed to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field the error is attributed to, or [`BASE`].
    pub field: String,
    /// Human-readable message, phrased to follow the field name.
    pub message: String,
}

impl FieldError {
    /// Create an error attributed to a named field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an error attributed to the record as a whole.
    pub fn base(message: impl Into<String>) -> Self {
        Self::new(BASE, message)
    }

    /// Full display form: `"<field> <message>"`, or just the message for
    /// [`BASE`] errors.
    pub fn full_message(&self) -> String {
        if self.field == BASE {
            self.message.clone()
        } else {
            format!("{} {}", self.field, self.message)
        }
    }
}

/// An ordered collection of [`FieldError`]s.
///
/// # Examples
///
/// ```
/// use factfold::{Errors, BASE};
///
/// let mut errors = Errors::new();
/// errors.add("value", "must be greater than 0");
/// errors.add(BASE, "racing condition on insert");
///
/// assert_eq!(errors.len(), 2);
/// assert_eq!(
///     errors.full_messages(),
///     vec!["value must be greater than 0", "racing condition on insert"]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Errors(Vec<FieldError>);

impl Errors {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error attributed to `field`.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    /// Append an existing [`FieldError`].
    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    /// Append clones of every error in `other`, preserving attribution.
    pub fn merge(&mut self, other: &Errors) {
        self.0.extend(other.0.iter().cloned());
    }

    /// `true` when no errors have been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the recorded errors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// All errors rendered via [`FieldError::full_message`], in order.
    pub fn full_messages(&self) -> Vec<String> {
        self.0.iter().map(FieldError::full_message).collect()
    }

    /// Messages recorded against a specific field, in order.
    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }
}

impl IntoIterator for Errors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<FieldError> for Errors {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
