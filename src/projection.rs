//! The projection interpretation engine: fold an ordered fact sequence
//! into a derived read state, optionally backed by a materialization.
//!
//! A [`Projection`] is a stateless interpreter definition - initial
//! state, per-kind transition functions, optional finalizer - assembled
//! once at startup. Each [`process`](Projection::process) call folds a
//! fresh state; there is no partial or resumable fold.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ProjectionError, StorageError};
use crate::errors::{BASE, Errors};
use crate::fact::FactKind;

/// A derived read state produced by folding facts.
///
/// # Contract
///
/// - `Default` is the state before any fact applies (used when no
///   initial-state function is registered).
/// - [`validate`](ReadState::validate) expresses the state's own
///   invariants; a consistency projection whose folded state reports
///   errors here makes the triggering fact inadmissible.
pub trait ReadState: Default + Clone + Serialize + Send + Sync + 'static {
    /// Validate the state's invariants. The default accepts everything.
    fn validate(&self) -> Errors {
        Errors::new()
    }
}

/// An interpretation function's reason for refusing the fact it was
/// handed.
///
/// Transitions return `Err(Rejection)` instead of mutating a shared
/// error collection; the stream layer translates the rejection into the
/// appropriate error category on the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Field the rejection is attributed to, or [`BASE`].
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl Rejection {
    /// Reject with attribution to a named field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Reject the fact as a whole.
    pub fn base(message: impl Into<String>) -> Self {
        Self::new(BASE, message)
    }
}

/// Policy for facts whose kind has no registered interpretation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownKind {
    /// Pass state through unchanged (the default; keeps old projections
    /// working as new fact kinds appear).
    #[default]
    Ignore,
    /// Fail the fold with [`ProjectionError::UnknownFactKind`].
    Raise,
}

/// Store for persisted materializations, keyed by stream identity.
///
/// # Contract
///
/// `upsert` must replace on conflict - "last computed state wins", no
/// history retained.
pub trait MaterializationStore<S>: Send + Sync {
    /// Insert or replace the record for `stream_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn upsert(&self, stream_id: &str, state: &S) -> Result<(), StorageError>;
}

/// How a projection's computed state relates to storage.
pub enum Materialization<S> {
    /// Purely computed; never persisted.
    Virtual,
    /// Upserted into a store keyed by `stream_id`.
    Persistent(Arc<dyn MaterializationStore<S>>),
}

type InitFn<S> = Box<dyn Fn(Option<DateTime<Utc>>) -> S + Send + Sync>;
type TransitionFn<E, S> =
    Box<dyn Fn(S, &E, Option<DateTime<Utc>>) -> Result<S, Rejection> + Send + Sync>;
type FinalFn<S> = Box<dyn Fn(S, Option<DateTime<Utc>>) -> S + Send + Sync>;

/// A pure fact interpreter: initial state, per-kind transitions, and an
/// optional finalizer, with an explicit unknown-kind policy and an
/// optional materialization binding.
///
/// Assembled with builder-style methods and registered on a
/// [`StreamConfig`](crate::StreamConfig) at startup.
///
/// # Examples
///
/// ```
/// use factfold::{Projection, Rejection};
/// # use serde::{Serialize, Deserialize};
/// # #[derive(Debug, Clone, Serialize, Deserialize)]
/// # #[serde(tag = "type", content = "data")]
/// # enum Tally { #[serde(rename = "tally.added")] Added { value: i64 } }
/// # impl factfold::FactKind for Tally {
/// #     fn kind(&self) -> &'static str { "tally.added" }
/// # }
/// # #[derive(Debug, Clone, Default, Serialize)]
/// # struct Total { value: i64 }
/// # impl factfold::ReadState for Total {}
/// let projection: Projection<Tally, Total> = Projection::new("running-total")
///     .interpretation_for("tally.added", |mut state: Total, fact: &Tally, _at| {
///         let Tally::Added { value } = fact;
///         state.value += value;
///         Ok(state)
///     });
///
/// let total = projection
///     .process(&[Tally::Added { value: 5 }, Tally::Added { value: 4 }], None, None)
///     .unwrap();
/// assert_eq!(total.value, 9);
/// ```
pub struct Projection<E, S> {
    name: String,
    init: Option<InitFn<S>>,
    transitions: HashMap<&'static str, TransitionFn<E, S>>,
    finalizer: Option<FinalFn<S>>,
    unknown_kind: UnknownKind,
    materialization: Option<Materialization<S>>,
}

impl<E: FactKind, S: ReadState> Projection<E, S> {
    /// Start an empty interpreter definition. The name identifies the
    /// projection in logs and scheduler jobs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: None,
            transitions: HashMap::new(),
            finalizer: None,
            unknown_kind: UnknownKind::default(),
            materialization: None,
        }
    }

    /// The projection's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the initial-state function, called once per fold with
    /// the effective time. Without one, `S::default()` seeds the fold.
    pub fn initial_state(
        mut self,
        f: impl Fn(Option<DateTime<Utc>>) -> S + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    /// Register the transition for a fact kind. Replaces any previous
    /// registration for the same kind.
    pub fn interpretation_for(
        mut self,
        kind: &'static str,
        f: impl Fn(S, &E, Option<DateTime<Utc>>) -> Result<S, Rejection> + Send + Sync + 'static,
    ) -> Self {
        self.transitions.insert(kind, Box::new(f));
        self
    }

    /// Register the finalizer, applied once after the last fact.
    pub fn final_state(
        mut self,
        f: impl Fn(S, Option<DateTime<Utc>>) -> S + Send + Sync + 'static,
    ) -> Self {
        self.finalizer = Some(Box::new(f));
        self
    }

    /// Fail folds on facts with no registered interpretation instead of
    /// ignoring them.
    pub fn raise_on_unknown_kinds(mut self) -> Self {
        self.unknown_kind = UnknownKind::Raise;
        self
    }

    /// Bind a purely computed materialization: `materialize` returns the
    /// state without persisting it.
    pub fn virtual_materialization(mut self) -> Self {
        self.materialization = Some(Materialization::Virtual);
        self
    }

    /// Bind a persistent materialization upserted into `store`.
    pub fn persistent_materialization(mut self, store: Arc<dyn MaterializationStore<S>>) -> Self {
        self.materialization = Some(Materialization::Persistent(store));
        self
    }

    pub(crate) fn has_materialization(&self) -> bool {
        self.materialization.is_some()
    }

    /// Fold `facts` left-to-right into a state.
    ///
    /// The effective time handed to the initial/transition/final
    /// functions is `at` when supplied, otherwise `as_of`.
    ///
    /// # Errors
    ///
    /// [`ProjectionError::Rejected`] when a transition refuses its fact,
    /// and [`ProjectionError::UnknownFactKind`] for an uninterpretable
    /// kind under the [`UnknownKind::Raise`] policy.
    pub fn process(
        &self,
        facts: &[E],
        as_of: Option<DateTime<Utc>>,
        at: Option<DateTime<Utc>>,
    ) -> Result<S, ProjectionError> {
        let effective = at.or(as_of);
        let mut state = match &self.init {
            Some(init) => init(effective),
            None => S::default(),
        };

        for fact in facts {
            let kind = fact.kind();
            match self.transitions.get(kind) {
                Some(transition) => {
                    state = transition(state, fact, effective).map_err(|rejection| {
                        ProjectionError::Rejected {
                            field: rejection.field,
                            message: rejection.message,
                        }
                    })?;
                }
                None => match self.unknown_kind {
                    UnknownKind::Raise => {
                        return Err(ProjectionError::UnknownFactKind {
                            kind: kind.to_string(),
                        });
                    }
                    UnknownKind::Ignore => {
                        tracing::debug!(projection = %self.name, kind, "skipping uninterpretable fact");
                    }
                },
            }
        }

        if let Some(finalizer) = &self.finalizer {
            state = finalizer(state, effective);
        }
        Ok(state)
    }

    /// Fold `facts` and, for a persistent binding, upsert the result
    /// keyed by `stream_id`. Returns the computed state either way, so
    /// virtual and persistent projections present a uniform shape.
    ///
    /// # Errors
    ///
    /// [`ProjectionError::MissingMaterialization`] when no
    /// materialization is bound, plus everything
    /// [`process`](Projection::process) can raise and store failures.
    pub fn materialize(
        &self,
        facts: &[E],
        stream_id: &str,
        as_of: Option<DateTime<Utc>>,
        at: Option<DateTime<Utc>>,
    ) -> Result<S, ProjectionError> {
        let binding = self
            .materialization
            .as_ref()
            .ok_or(ProjectionError::MissingMaterialization)?;

        let state = self.process(facts, as_of, at)?;
        if let Materialization::Persistent(store) = binding {
            store.upsert(stream_id, &state)?;
            tracing::debug!(projection = %self.name, stream_id, "materialization upserted");
        }
        Ok(state)
    }
}

// --- Type-erased traits for stream registration ---

/// Outcome of evaluating the consistency projection against
/// (history + new fact).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// The resulting state is valid; the fact may persist.
    Admissible,
    /// The resulting state failed its own validation.
    InvalidState(Errors),
    /// An interpretation function rejected the fact outright.
    Rejected(Rejection),
}

/// Type-erased consistency evaluation, letting the stream hold one gate
/// without knowing the projection's state type.
pub(crate) trait ConsistencyGate<E>: Send + Sync {
    fn evaluate(
        &self,
        facts: &[E],
        as_of: Option<DateTime<Utc>>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Verdict, ProjectionError>;
}

impl<E: FactKind, S: ReadState> ConsistencyGate<E> for Projection<E, S> {
    fn evaluate(
        &self,
        facts: &[E],
        as_of: Option<DateTime<Utc>>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Verdict, ProjectionError> {
        match self.process(facts, as_of, at) {
            Ok(state) => {
                let errors = state.validate();
                if errors.is_empty() {
                    Ok(Verdict::Admissible)
                } else {
                    Ok(Verdict::InvalidState(errors))
                }
            }
            Err(ProjectionError::Rejected { field, message }) => {
                Ok(Verdict::Rejected(Rejection { field, message }))
            }
            Err(other) => Err(other),
        }
    }
}

/// Type-erased materialization dispatch, letting the stream hold
/// heterogeneous projections in one registration list.
pub(crate) trait Materializer<E>: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        facts: &[E],
        stream_id: &str,
        as_of: Option<DateTime<Utc>>,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), ProjectionError>;

    fn has_materialization(&self) -> bool;
}

impl<E: FactKind, S: ReadState> Materializer<E> for Projection<E, S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        facts: &[E],
        stream_id: &str,
        as_of: Option<DateTime<Utc>>,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), ProjectionError> {
        self.materialize(facts, stream_id, as_of, at).map(|_| ())
    }

    fn has_materialization(&self) -> bool {
        Projection::has_materialization(self)
    }
}

/// In-memory reference implementation of [`MaterializationStore`].
///
/// Stores each state as its JSON snapshot keyed by stream identity, with
/// replace-on-conflict semantics. Usable as the store for any
/// [`ReadState`].
#[derive(Debug, Default)]
pub struct InMemoryMaterializationStore {
    records: std::sync::Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryMaterializationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored snapshot for a stream, if any.
    pub fn get(&self, stream_id: &str) -> Option<serde_json::Value> {
        self.records
            .lock()
            .expect("store lock poisoned")
            .get(stream_id)
            .cloned()
    }

    /// Number of stored records (one per stream, never more).
    pub fn record_count(&self) -> usize {
        self.records.lock().expect("store lock poisoned").len()
    }
}

impl<S: ReadState> MaterializationStore<S> for InMemoryMaterializationStore {
    fn upsert(&self, stream_id: &str, state: &S) -> Result<(), StorageError> {
        let snapshot = serde_json::to_value(state)
            .map_err(|e| StorageError::Backend(format!("state snapshot failed: {e}")))?;
        self.records
            .lock()
            .expect("store lock poisoned")
            .insert(stream_id.to_string(), snapshot);
        Ok(())
    }
}
