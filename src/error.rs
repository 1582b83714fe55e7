//! Crate-level error types for the append protocol, projection engine,
//! and collaborator contracts.
//!
//! Validation and consistency rejections are *not* errors in this module's
//! sense: those are reported on the returned [`Fact`](crate::Fact) and are
//! recoverable by the caller. The enums here cover configuration mistakes
//! and collaborator failures, which abort the whole call.

use chrono::{DateTime, Utc};

/// Failure in a storage collaborator (fact log or materialization store).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing store reported a failure unrelated to the uniqueness
    /// constraint (connection loss, serialization, etc.).
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Error raised by the projection interpretation engine.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// A fact kind had no registered interpretation and the projection is
    /// configured to raise on unknown kinds.
    #[error("facts of kind `{kind}` are not interpretable by this projection")]
    UnknownFactKind {
        /// The unmatched kind tag.
        kind: String,
    },

    /// `materialize` was called on a projection with no materialization
    /// bound.
    #[error("no materialization is bound to this projection")]
    MissingMaterialization,

    /// An interpretation function rejected the fact it was folding.
    ///
    /// During a consistency check the stream translates this into the
    /// fact's interpretation errors instead of propagating it.
    #[error("fact rejected during interpretation: {field} {message}")]
    Rejected {
        /// Field the rejection is attributed to, or [`BASE`](crate::BASE).
        field: String,
        /// Human-readable rejection reason.
        message: String,
    },

    /// The materialization store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error aborting a whole [`Stream::append`](crate::Stream::append) call.
///
/// Per the propagation policy, everything here is either a programmer
/// error (temporal configuration, projection configuration) or a
/// collaborator failure. Retrying without a code or configuration change
/// will not help, with the exception of [`AppendError::Storage`].
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// An explicit `at` argument and the fact's configured actual-time
    /// attribute are both present and denote different instants.
    #[error(
        "explicit actual time {explicit} conflicts with the fact's `{attribute}` value {from_fact}"
    )]
    ConflictingActualTime {
        /// The configured actual-time attribute name.
        attribute: String,
        /// Instant from the explicit `at` argument, normalized.
        explicit: DateTime<Utc>,
        /// Instant from the fact attribute, normalized.
        from_fact: DateTime<Utc>,
    },

    /// The stream declares an actual-time attribute but the appended fact
    /// kind does not define it.
    #[error(
        "stream declares actual-time attribute `{attribute}` but fact kind `{kind}` does not define it"
    )]
    MissingActualTimeAttribute {
        /// The configured actual-time attribute name.
        attribute: String,
        /// The offending fact kind tag.
        kind: String,
    },

    /// The contextual-metadata collaborator reported an invalid context.
    /// No row was written; the fact remains unpersisted.
    #[error("invalid contextual metadata: {0}")]
    InvalidContextualMetadata(String),

    /// A caller-supplied temporal-context function returned no time value
    /// for an async projection registration.
    #[error("temporal-context function returned no time value for projection `{projection}`")]
    InvalidTemporalContext {
        /// Name of the registered projection.
        projection: String,
    },

    /// The fact payload could not be serialized for persistence.
    #[error("fact payload could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A projection raised a configuration error during the consistency
    /// check or transactional dispatch.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// The fact log failed for a reason other than the version race.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error building a [`StreamConfig`](crate::StreamConfig).
///
/// Surfaced at startup, when the configuration object is assembled, so
/// misconfigured projections never reach request time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Async projections were registered but no scheduler was provided.
    #[error("async projection registrations require a scheduler")]
    SchedulerRequired,

    /// A transactional or async projection has no materialization bound,
    /// so dispatching it could never succeed.
    #[error("projection `{projection}` is registered for materialization but has none bound")]
    MissingMaterialization {
        /// Name of the offending projection.
        projection: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn conflicting_actual_time_names_both_instants() {
        let err = AppendError::ConflictingActualTime {
            attribute: "at".to_string(),
            explicit: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            from_fact: Utc.with_ymd_and_hms(2025, 2, 15, 12, 0, 0).unwrap(),
        };
        let message = err.to_string();
        assert!(message.contains("2025-03-01"));
        assert!(message.contains("2025-02-15"));
        assert!(message.contains("`at`"));
    }

    #[test]
    fn missing_actual_time_attribute_names_kind() {
        let err = AppendError::MissingActualTimeAttribute {
            attribute: "at".to_string(),
            kind: "debt.issued".to_string(),
        };
        assert!(err.to_string().contains("debt.issued"));
    }

    #[test]
    fn unknown_fact_kind_display() {
        let err = ProjectionError::UnknownFactKind {
            kind: "salary.set".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "facts of kind `salary.set` are not interpretable by this projection"
        );
    }

    #[test]
    fn storage_error_converts_into_append_error() {
        let err: AppendError = StorageError::Backend("connection reset".to_string()).into();
        assert!(matches!(err, AppendError::Storage(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn projection_error_converts_into_append_error() {
        let err: AppendError = ProjectionError::MissingMaterialization.into();
        assert!(matches!(
            err,
            AppendError::Projection(ProjectionError::MissingMaterialization)
        ));
    }

    // Errors cross thread boundaries when streams are shared across workers.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<AppendError>();
            assert_send_sync::<ProjectionError>();
            assert_send_sync::<StorageError>();
            assert_send_sync::<ConfigError>();
        }
    };
}
