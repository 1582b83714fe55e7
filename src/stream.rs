//! Streams: the aggregation root orchestrating the append protocol.
//!
//! A [`StreamConfig`] is the write-once registration object shared by
//! every stream instance of one family: the consistency projection,
//! transactional projections, async registrations, and collaborator
//! handles. Individual [`Stream`] values are cheap, short-lived handles
//! over one `stream_id` and one knowledge boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::context::{ContextSource, NoContext};
use crate::entry::{FactEntry, NewFactEntry, decode_entry, encode_fact};
use crate::error::{AppendError, ConfigError, ProjectionError, StorageError};
use crate::fact::{Fact, FactKind, racing_condition_error};
use crate::log::{FactLog, InsertError};
use crate::projection::{ConsistencyGate, Materializer, Projection, ReadState, Verdict};
use crate::scheduler::{ProjectionJob, ScheduleOptions, Scheduler, TemporalContext};
use crate::time::{TimeValue, resolve_occurred_at};

/// An async projection registration: the projection, its scheduling
/// options, and how to resolve the temporal context at enqueue time.
struct AsyncRegistration<E> {
    projection: Arc<dyn Materializer<E>>,
    options: ScheduleOptions,
    temporal_context: TemporalContext<E>,
}

/// Process-wide stream configuration, built once at startup and shared
/// read-only behind an [`Arc`].
///
/// Registration lists never mutate after [`build`](StreamConfigBuilder::build),
/// so concurrent readers need no synchronization.
pub struct StreamConfig<E: FactKind> {
    log: Arc<dyn FactLog>,
    context: Arc<dyn ContextSource>,
    scheduler: Option<Arc<dyn Scheduler>>,
    consistency: Option<Arc<dyn ConsistencyGate<E>>>,
    transactional: Vec<Arc<dyn Materializer<E>>>,
    async_registrations: Vec<AsyncRegistration<E>>,
    actual_time_attribute: Option<String>,
}

impl<E: FactKind> StreamConfig<E> {
    /// Start building a configuration over the given fact log.
    pub fn builder(log: Arc<dyn FactLog>) -> StreamConfigBuilder<E> {
        StreamConfigBuilder {
            log,
            context: Arc::new(NoContext),
            scheduler: None,
            consistency: None,
            transactional: Vec::new(),
            async_registrations: Vec::new(),
            actual_time_attribute: None,
        }
    }

    /// A stream handle for `stream_id` with the knowledge boundary set
    /// to now.
    pub fn with_id(self: &Arc<Self>, stream_id: impl Into<String>) -> Stream<E> {
        self.with_id_as_of(stream_id, Utc::now())
    }

    /// A stream handle for `stream_id` bounded to facts recorded no
    /// later than `as_of`.
    pub fn with_id_as_of(
        self: &Arc<Self>,
        stream_id: impl Into<String>,
        as_of: DateTime<Utc>,
    ) -> Stream<E> {
        Stream {
            config: Arc::clone(self),
            stream_id: stream_id.into(),
            as_of,
            prior: None,
            session: Vec::new(),
        }
    }
}

/// Builder for [`StreamConfig`]. Registration order is preserved for
/// transactional and async dispatch.
pub struct StreamConfigBuilder<E: FactKind> {
    log: Arc<dyn FactLog>,
    context: Arc<dyn ContextSource>,
    scheduler: Option<Arc<dyn Scheduler>>,
    consistency: Option<Arc<dyn ConsistencyGate<E>>>,
    transactional: Vec<Arc<dyn Materializer<E>>>,
    async_registrations: Vec<AsyncRegistration<E>>,
    actual_time_attribute: Option<String>,
}

impl<E: FactKind> StreamConfigBuilder<E> {
    /// Use `context` as the contextual-metadata source consulted at
    /// persist time.
    pub fn context_source(mut self, context: Arc<dyn ContextSource>) -> Self {
        self.context = context;
        self
    }

    /// Use `scheduler` for async projection dispatch. Required when any
    /// async projection is registered.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Register the consistency projection evaluated before every
    /// persist. At most one; a second call replaces the first.
    pub fn consistency_projection<S: ReadState>(mut self, projection: Projection<E, S>) -> Self {
        self.consistency = Some(Arc::new(projection));
        self
    }

    /// Register a projection materialized synchronously, in-line, after
    /// each successful persist.
    pub fn transactional_projection<S: ReadState>(mut self, projection: Projection<E, S>) -> Self {
        self.transactional.push(Arc::new(projection));
        self
    }

    /// Register a projection materialized via the scheduler after each
    /// successful persist.
    pub fn async_projection<S: ReadState>(
        mut self,
        projection: Projection<E, S>,
        options: ScheduleOptions,
        temporal_context: TemporalContext<E>,
    ) -> Self {
        self.async_registrations.push(AsyncRegistration {
            projection: Arc::new(projection),
            options,
            temporal_context,
        });
        self
    }

    /// Treat the named fact attribute as the actual-time source when no
    /// explicit `at` accompanies an append.
    pub fn actual_time_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.actual_time_attribute = Some(attribute.into());
        self
    }

    /// Finish the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SchedulerRequired`] when async projections exist
    /// without a scheduler, and [`ConfigError::MissingMaterialization`]
    /// when a registered transactional or async projection has no
    /// materialization bound.
    pub fn build(self) -> Result<Arc<StreamConfig<E>>, ConfigError> {
        if !self.async_registrations.is_empty() && self.scheduler.is_none() {
            return Err(ConfigError::SchedulerRequired);
        }

        for projection in &self.transactional {
            if !projection.has_materialization() {
                return Err(ConfigError::MissingMaterialization {
                    projection: projection.name().to_string(),
                });
            }
        }
        for registration in &self.async_registrations {
            if !registration.projection.has_materialization() {
                return Err(ConfigError::MissingMaterialization {
                    projection: registration.projection.name().to_string(),
                });
            }
        }

        Ok(Arc::new(StreamConfig {
            log: self.log,
            context: self.context,
            scheduler: self.scheduler,
            consistency: self.consistency,
            transactional: self.transactional,
            async_registrations: self.async_registrations,
            actual_time_attribute: self.actual_time_attribute,
        }))
    }
}

/// The ordered fact history of one logical entity, plus the append
/// protocol over it.
///
/// Holds a cached, `occurred_at`-ordered view of prior fact entries with
/// `recorded_at <= as_of`, loaded lazily on first use, and the facts
/// appended through this handle. Two handles racing on the same
/// `stream_id` are arbitrated by the log's uniqueness constraint alone.
pub struct Stream<E: FactKind> {
    config: Arc<StreamConfig<E>>,
    stream_id: String,
    as_of: DateTime<Utc>,
    prior: Option<Vec<FactEntry>>,
    session: Vec<Fact<E>>,
}

impl<E: FactKind> Stream<E> {
    /// The entity this stream aggregates.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The knowledge boundary prior facts were loaded under.
    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    /// Append a fact through the full protocol: own validation, actual-
    /// time resolution, consistency check, persist, then transactional
    /// and async projection dispatch.
    ///
    /// Validation failures, consistency rejections, and the version race
    /// are reported on the returned [`Fact`], not as `Err`: inspect
    /// [`Fact::is_valid`] and the error views. `Err` is reserved for
    /// configuration errors, invalid contextual metadata, and
    /// collaborator failures.
    ///
    /// The fact insert and the transactional upserts are not atomic: a
    /// transactional store failure after a successful insert leaves the
    /// fact persisted. Hosts needing atomicity implement [`FactLog`] and
    /// [`MaterializationStore`](crate::MaterializationStore) over one
    /// transactional connection.
    ///
    /// # Arguments
    ///
    /// * `fact` - The fact to append.
    /// * `at` - Explicit actual time; takes precedence over a configured
    ///   actual-time attribute, conflicting with it is an error.
    ///
    /// # Errors
    ///
    /// See [`AppendError`].
    pub fn append(
        &mut self,
        fact: Fact<E>,
        at: Option<TimeValue>,
    ) -> Result<Fact<E>, AppendError> {
        let mut fact = fact;

        // 1. Own validation: a malformed fact never reaches projections
        //    or storage.
        if !fact.validate().is_empty() {
            tracing::debug!(
                stream_id = %self.stream_id,
                kind = fact.kind(),
                "fact failed its own validation"
            );
            return Ok(fact);
        }

        // 2. Actual-time resolution.
        let attribute = self
            .config
            .actual_time_attribute
            .as_deref()
            .map(|name| (name, fact.data().actual_time(name)));
        let occurred_at = resolve_occurred_at(at, attribute, fact.kind())?;

        // 3. Consistency check against (history + this fact).
        if let Some(gate) = self.config.consistency.clone() {
            let mut folded = self.fact_data()?;
            folded.push(fact.data().clone());
            match gate.evaluate(&folded, Some(self.as_of), None)? {
                Verdict::Admissible => {}
                Verdict::InvalidState(errors) => {
                    tracing::debug!(
                        stream_id = %self.stream_id,
                        kind = fact.kind(),
                        "fact would lead to an invalid state"
                    );
                    fact.set_state_errors(errors);
                    return Ok(fact);
                }
                Verdict::Rejected(rejection) => {
                    tracing::debug!(
                        stream_id = %self.stream_id,
                        kind = fact.kind(),
                        "fact rejected by interpretation"
                    );
                    fact.add_interpretation_error(rejection);
                    return Ok(fact);
                }
            }
        }

        // 4. Persist. Context is validated before any row is written.
        let context = self.config.context.current();
        let context_errors = self.config.context.validate(&context);
        if !context_errors.is_empty() {
            return Err(AppendError::InvalidContextualMetadata(
                context_errors.full_messages().join(", "),
            ));
        }

        let version = self.next_version()?;
        let (kind, payload) = encode_fact(fact.data())?;
        let meta = if context.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(context))
        };

        match self.config.log.insert(NewFactEntry {
            kind,
            stream_id: self.stream_id.clone(),
            version,
            payload,
            meta,
            occurred_at,
        }) {
            Ok(entry) => {
                tracing::debug!(
                    stream_id = %self.stream_id,
                    version,
                    kind = fact.kind(),
                    "fact persisted"
                );
                fact.mark_persisted(entry);
            }
            Err(InsertError::VersionRace { version, .. }) => {
                // Reported, not fatal: the caller retries with a fresh
                // stream handle to observe the committed state.
                tracing::debug!(
                    stream_id = %self.stream_id,
                    version,
                    "version race lost on insert"
                );
                racing_condition_error(&mut fact);
                return Ok(fact);
            }
            Err(InsertError::Storage(e)) => return Err(e.into()),
        }
        self.session.push(fact.clone());

        // 5. Downstream dispatch, only after successful persistence.
        self.run_transactional_projections()?;
        self.schedule_async_projections(&fact)?;

        Ok(fact)
    }

    /// The full history view: prior facts merged with session-appended
    /// facts, in `occurred_at` order.
    ///
    /// Entries whose kind is unknown to `E` are skipped with a warning,
    /// keeping old logs readable by newer fact enums.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if loading prior facts fails.
    pub fn facts(&mut self) -> Result<Vec<Fact<E>>, StorageError> {
        let mut all = self.decoded_prior()?;
        all.extend(self.session.iter().cloned());
        all.sort_by_key(|fact| fact.occurred_at());
        Ok(all)
    }

    /// Fold this stream's history through `projection`, optionally
    /// bounded on the validity-time axis.
    ///
    /// `at` keeps only facts with `occurred_at <= at` and flows into the
    /// interpretation functions as the temporal context; omitted, the
    /// whole known history folds with `as_of` as the context.
    ///
    /// # Errors
    ///
    /// Everything [`Projection::process`] can raise, plus storage
    /// failures loading the history.
    pub fn projected_with<S: ReadState>(
        &mut self,
        projection: &Projection<E, S>,
        at: Option<DateTime<Utc>>,
    ) -> Result<S, ProjectionError> {
        let facts = self.facts()?;
        let data: Vec<E> = facts
            .iter()
            .filter(|fact| match (at, fact.occurred_at()) {
                (Some(bound), Some(occurred)) => occurred <= bound,
                _ => true,
            })
            .map(|fact| fact.data().clone())
            .collect();
        projection.process(&data, Some(self.as_of), at)
    }

    fn prior_entries(&mut self) -> Result<&[FactEntry], StorageError> {
        if self.prior.is_none() {
            self.prior = Some(self.config.log.query(&self.stream_id, self.as_of)?);
        }
        Ok(self.prior.as_deref().unwrap_or_default())
    }

    fn decoded_prior(&mut self) -> Result<Vec<Fact<E>>, StorageError> {
        let entries = self.prior_entries()?.to_vec();
        let mut facts = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_entry::<E>(&entry) {
                Some(data) => facts.push(Fact::from_entry(data, entry)),
                None => {
                    tracing::warn!(
                        stream_id = %self.stream_id,
                        kind = %entry.kind,
                        version = entry.version,
                        "skipping fact entry with unknown kind"
                    );
                }
            }
        }
        Ok(facts)
    }

    fn fact_data(&mut self) -> Result<Vec<E>, StorageError> {
        Ok(self
            .facts()?
            .into_iter()
            .map(|fact| fact.data().clone())
            .collect())
    }

    /// Next version from the cached view: one past the highest version
    /// this handle knows about. The log's uniqueness constraint catches
    /// stale views.
    fn next_version(&mut self) -> Result<u64, StorageError> {
        let prior_max = self
            .prior_entries()?
            .iter()
            .map(|entry| entry.version)
            .max()
            .unwrap_or(0);
        let session_max = self
            .session
            .iter()
            .filter_map(|fact| fact.entry().map(|entry| entry.version))
            .max()
            .unwrap_or(0);
        Ok(prior_max.max(session_max) + 1)
    }

    fn run_transactional_projections(&mut self) -> Result<(), AppendError> {
        if self.config.transactional.is_empty() {
            return Ok(());
        }
        let facts = self.fact_data()?;
        let last_at = self
            .session
            .last()
            .and_then(|fact| fact.occurred_at());

        let config = Arc::clone(&self.config);
        for projection in &config.transactional {
            match projection.run(&facts, &self.stream_id, Some(self.as_of), last_at) {
                Ok(()) => {}
                Err(ProjectionError::Rejected { field, message }) => {
                    // Rejections outside the consistency projection are
                    // ineffective: the fact is already persisted. Surface
                    // them, then move on.
                    tracing::warn!(
                        projection = projection.name(),
                        stream_id = %self.stream_id,
                        field = %field,
                        message = %message,
                        "interpretation rejection in a non-consistency projection has no effect"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
        Ok(())
    }

    fn schedule_async_projections(&self, last_fact: &Fact<E>) -> Result<(), AppendError> {
        if self.config.async_registrations.is_empty() {
            return Ok(());
        }
        // Guaranteed by the builder.
        let Some(scheduler) = &self.config.scheduler else {
            return Ok(());
        };

        for registration in &self.config.async_registrations {
            let at = registration
                .temporal_context
                .resolve(last_fact, registration.projection.name())?;
            scheduler.enqueue(ProjectionJob {
                options: registration.options.clone(),
                stream_id: self.stream_id.clone(),
                projection: registration.projection.name().to_string(),
                as_of: None,
                at,
            });
        }
        Ok(())
    }
}
