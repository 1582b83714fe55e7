//! The domain fact contract and the engine's per-fact error model.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::entry::FactEntry;
use crate::errors::{BASE, Errors, FieldError};
use crate::projection::Rejection;
use crate::time::ActualTimeField;

/// Marker prepended to adjacent-state errors in the merged
/// [`Fact::errors`] view, so callers can tell "this fact broke downstream
/// state" from "this fact is malformed".
pub const LED_TO_INVALID_STATE_PREFIX: &str = "led to invalid state";

/// A set of domain fact kinds appendable to one stream family.
///
/// Implementing types are enums over the stream's fact kinds, using
/// adjacently tagged serde (`#[serde(tag = "type", content = "data")]`)
/// so the kind tag round-trips through the persisted payload.
///
/// # Contract
///
/// - [`kind`](FactKind::kind) must return the serde tag of the variant,
///   so an entry written for a fact decodes back into the same variant.
/// - [`validate`](FactKind::validate) must be a pure function of the
///   fact's own fields: structural and business rules that need no
///   stream history. History-dependent rules belong in a consistency
///   projection.
/// - [`actual_time`](FactKind::actual_time) reports the named
///   actual-time attribute for streams configured with one. Kinds
///   without such a field keep the default (`Undefined`).
pub trait FactKind: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The kind tag identifying this fact's variant.
    fn kind(&self) -> &'static str;

    /// Validate the fact's own fields, returning structural/business-rule
    /// errors. The default accepts everything.
    fn validate(&self) -> Errors {
        Errors::new()
    }

    /// Report the value of the named actual-time attribute.
    fn actual_time(&self, _attribute: &str) -> ActualTimeField {
        ActualTimeField::Undefined
    }
}

/// A single immutable domain fact plus the engine's bookkeeping around it.
///
/// Wraps a [`FactKind`] value together with the three independently
/// tracked error categories and, once appended, the persisted
/// [`FactEntry`]. The wrapped fields are never mutated by the engine;
/// only the error collections and the persisted handle change.
///
/// Error categories:
///
/// - *own errors* - the fact's own field validation
///   ([`Fact::validate`]).
/// - *adjacent-state errors* - set when a consistency projection, folded
///   over history plus this fact, produced an invalid state.
/// - *interpretation errors* - set when an interpretation function
///   rejected this fact during the consistency fold.
#[derive(Debug, Clone)]
pub struct Fact<E> {
    data: E,
    own_errors: Errors,
    adjacent_state_errors: Errors,
    interpretation_errors: Errors,
    entry: Option<FactEntry>,
}

impl<E: FactKind> Fact<E> {
    /// Wrap a domain fact. The fact starts unpersisted with all error
    /// categories empty.
    pub fn new(data: E) -> Self {
        Self {
            data,
            own_errors: Errors::new(),
            adjacent_state_errors: Errors::new(),
            interpretation_errors: Errors::new(),
            entry: None,
        }
    }

    /// The wrapped domain fact.
    pub fn data(&self) -> &E {
        &self.data
    }

    /// The fact's kind tag.
    pub fn kind(&self) -> &'static str {
        self.data.kind()
    }

    /// Run the fact's own field rules, replacing the own-error
    /// collection. The other two categories are untouched.
    pub fn validate(&mut self) -> &Errors {
        self.own_errors = self.data.validate();
        &self.own_errors
    }

    /// `true` when all three error categories are empty.
    ///
    /// Reflects the most recent [`validate`](Fact::validate) call plus
    /// whatever the append protocol contributed; a freshly wrapped fact
    /// reports valid until validated.
    pub fn is_valid(&self) -> bool {
        self.own_errors.is_empty()
            && self.adjacent_state_errors.is_empty()
            && self.interpretation_errors.is_empty()
    }

    /// `true` once the fact has been durably appended.
    pub fn is_persisted(&self) -> bool {
        self.entry.is_some()
    }

    /// The persisted row, once appended.
    pub fn entry(&self) -> Option<&FactEntry> {
        self.entry.as_ref()
    }

    /// When the system recorded this fact; `None` until persisted.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.entry.as_ref().map(|e| e.recorded_at)
    }

    /// When this fact took effect in the modeled world; `None` until
    /// persisted.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.entry.as_ref().map(|e| e.occurred_at)
    }

    /// The fact's own field errors.
    pub fn own_errors(&self) -> &Errors {
        &self.own_errors
    }

    /// Errors from the consistency projection: the state this fact would
    /// have led to was invalid.
    pub fn state_errors(&self) -> &Errors {
        &self.adjacent_state_errors
    }

    /// Explicit rejections raised by interpretation functions while this
    /// fact was folded under consistency evaluation.
    pub fn interpretation_errors(&self) -> &Errors {
        &self.interpretation_errors
    }

    /// Merged view of all three categories for display.
    ///
    /// Own and interpretation errors keep their field attribution;
    /// adjacent-state errors are re-attributed to [`BASE`] and prefixed
    /// with [`LED_TO_INVALID_STATE_PREFIX`].
    pub fn errors(&self) -> Errors {
        let mut merged = Errors::new();
        merged.merge(&self.own_errors);
        for error in self.adjacent_state_errors.iter() {
            merged.push(FieldError::base(format!(
                "{LED_TO_INVALID_STATE_PREFIX}: {}",
                error.full_message()
            )));
        }
        merged.merge(&self.interpretation_errors);
        merged
    }

    /// Own and interpretation errors merged, excluding adjacent-state
    /// errors. Distinguishes "this fact is malformed" from "this fact
    /// broke downstream state".
    pub fn own_errors_view(&self) -> Errors {
        let mut merged = Errors::new();
        merged.merge(&self.own_errors);
        merged.merge(&self.interpretation_errors);
        merged
    }

    pub(crate) fn add_own_error(&mut self, field: &str, message: &str) {
        self.own_errors.add(field, message);
    }

    pub(crate) fn set_state_errors(&mut self, errors: Errors) {
        self.adjacent_state_errors = errors;
    }

    pub(crate) fn add_interpretation_error(&mut self, rejection: Rejection) {
        self.interpretation_errors
            .add(rejection.field, rejection.message);
    }

    pub(crate) fn mark_persisted(&mut self, entry: FactEntry) {
        self.entry = Some(entry);
    }

    /// Reconstruct a persisted fact from its log entry and decoded data.
    pub(crate) fn from_entry(data: E, entry: FactEntry) -> Self {
        let mut fact = Self::new(data);
        fact.entry = Some(entry);
        fact
    }
}

// Convenience: `BASE` re-attribution happens here, so keep it close.
pub(crate) const RACING_CONDITION_MESSAGE: &str = "racing condition on insert";

pub(crate) fn racing_condition_error<E: FactKind>(fact: &mut Fact<E>) {
    fact.add_own_error(BASE, RACING_CONDITION_MESSAGE);
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use serde::Deserialize;

    /// Debt facts used as fixtures across the crate's unit tests.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    pub(crate) enum DebtFact {
        #[serde(rename = "debt.issued")]
        Issued {
            value: f64,
            at: chrono::NaiveDate,
        },
        #[serde(rename = "debt.paid")]
        Paid {
            value: f64,
            discount: f64,
            at: chrono::NaiveDate,
        },
        #[serde(rename = "debt.adjusted_by_index")]
        AdjustedByIndex { rate: f64 },
    }

    impl FactKind for DebtFact {
        fn kind(&self) -> &'static str {
            match self {
                DebtFact::Issued { .. } => "debt.issued",
                DebtFact::Paid { .. } => "debt.paid",
                DebtFact::AdjustedByIndex { .. } => "debt.adjusted_by_index",
            }
        }

        fn validate(&self) -> Errors {
            let mut errors = Errors::new();
            match self {
                DebtFact::Issued { value, .. } if *value <= 0.0 => {
                    errors.add("value", "must be greater than 0");
                }
                DebtFact::Paid { value, .. } if *value <= 0.0 => {
                    errors.add("value", "must be greater than 0");
                }
                _ => {}
            }
            errors
        }

        fn actual_time(&self, attribute: &str) -> ActualTimeField {
            if attribute != "at" {
                return ActualTimeField::Undefined;
            }
            match self {
                DebtFact::Issued { at, .. } | DebtFact::Paid { at, .. } => {
                    ActualTimeField::Value((*at).into())
                }
                DebtFact::AdjustedByIndex { .. } => ActualTimeField::Undefined,
            }
        }
    }

    pub(crate) fn issued(value: f64) -> DebtFact {
        DebtFact::Issued {
            value,
            at: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    pub(crate) fn paid(value: f64, discount: f64) -> DebtFact {
        DebtFact::Paid {
            value,
            discount,
            at: chrono::NaiveDate::from_ymd_opt(2025, 2, 15).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::{DebtFact, issued, paid};
    use super::*;
    use chrono::TimeZone;

    fn entry_for(fact: &DebtFact) -> FactEntry {
        let recorded = Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap();
        FactEntry {
            kind: fact.kind().to_string(),
            stream_id: "debt-1".to_string(),
            version: 1,
            payload: serde_json::json!({}),
            meta: None,
            recorded_at: recorded,
            occurred_at: recorded,
        }
    }

    #[test]
    fn fresh_fact_is_unpersisted_and_valid() {
        let fact = Fact::new(issued(100.0));
        assert!(!fact.is_persisted());
        assert!(fact.is_valid());
        assert_eq!(fact.recorded_at(), None);
        assert_eq!(fact.occurred_at(), None);
    }

    #[test]
    fn validate_populates_own_errors_only() {
        let mut fact = Fact::new(issued(-100.0));
        fact.validate();

        assert!(!fact.is_valid());
        assert_eq!(
            fact.own_errors().messages_for("value"),
            vec!["must be greater than 0"]
        );
        assert!(fact.state_errors().is_empty());
        assert!(fact.interpretation_errors().is_empty());
    }

    #[test]
    fn state_errors_invalidate_the_fact() {
        let mut fact = Fact::new(paid(80.0, 30.0));
        fact.validate();
        assert!(fact.is_valid());

        let mut errors = Errors::new();
        errors.add("outstanding_balance", "must be greater than or equal to 0");
        fact.set_state_errors(errors);

        assert!(!fact.is_valid());
    }

    #[test]
    fn merged_errors_prefix_state_errors_on_base() {
        let mut fact = Fact::new(paid(80.0, 30.0));
        let mut errors = Errors::new();
        errors.add("outstanding_balance", "must be greater than or equal to 0");
        fact.set_state_errors(errors);

        let merged = fact.errors();
        assert_eq!(merged.len(), 1);
        let error = merged.iter().next().unwrap();
        assert_eq!(error.field, BASE);
        assert_eq!(
            error.message,
            "led to invalid state: outstanding_balance must be greater than or equal to 0"
        );
    }

    #[test]
    fn own_errors_view_excludes_state_errors() {
        let mut fact = Fact::new(paid(80.0, 30.0));
        let mut state = Errors::new();
        state.add("outstanding_balance", "must be greater than or equal to 0");
        fact.set_state_errors(state);
        fact.add_interpretation_error(Rejection::base("negative balance"));

        let view = fact.own_errors_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.messages_for(BASE), vec!["negative balance"]);
    }

    #[test]
    fn interpretation_errors_appear_in_both_views_with_attribution() {
        let mut fact = Fact::new(paid(200.0, 0.0));
        fact.add_interpretation_error(Rejection::new("value", "exceeds limit"));

        assert!(!fact.is_valid());
        assert_eq!(fact.errors().messages_for("value"), vec!["exceeds limit"]);
        assert_eq!(
            fact.own_errors_view().messages_for("value"),
            vec!["exceeds limit"]
        );
    }

    #[test]
    fn racing_condition_is_reported_as_an_own_error() {
        let mut fact = Fact::new(issued(100.0));
        racing_condition_error(&mut fact);

        assert!(!fact.is_valid());
        assert_eq!(
            fact.own_errors().messages_for(BASE),
            vec![RACING_CONDITION_MESSAGE]
        );
    }

    #[test]
    fn persisted_fact_exposes_both_time_axes() {
        let data = issued(100.0);
        let entry = entry_for(&data);
        let fact = Fact::from_entry(data, entry.clone());

        assert!(fact.is_persisted());
        assert_eq!(fact.recorded_at(), Some(entry.recorded_at));
        assert_eq!(fact.occurred_at(), Some(entry.occurred_at));
    }

    #[test]
    fn actual_time_reports_three_valued_answer() {
        let with_at = issued(100.0);
        assert!(matches!(
            with_at.actual_time("at"),
            ActualTimeField::Value(_)
        ));

        let without_at = DebtFact::AdjustedByIndex { rate: 0.05 };
        assert_eq!(without_at.actual_time("at"), ActualTimeField::Undefined);
        assert_eq!(with_at.actual_time("other"), ActualTimeField::Undefined);
    }
}
