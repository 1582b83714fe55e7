//! Bitemporal time values and actual-time resolution.
//!
//! The engine tracks two independent axes: `recorded_at` (when the system
//! learned a fact) and `occurred_at` (when the fact took effect in the
//! modeled world). Callers may express the latter as either a full instant
//! or a bare date; bare dates normalize to their start-of-day instant in
//! UTC before comparison or storage.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::AppendError;

/// A caller-supplied point on the actual-time axis.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use factfold::TimeValue;
///
/// let date = TimeValue::from(NaiveDate::from_ymd_opt(2025, 2, 15).unwrap());
/// assert_eq!(date.instant().to_rfc3339(), "2025-02-15T00:00:00+00:00");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValue {
    /// A bare date; denotes its start-of-day instant in UTC.
    Date(NaiveDate),
    /// A full instant.
    Instant(DateTime<Utc>),
}

impl TimeValue {
    /// Normalize to a concrete instant. Bare dates map to 00:00:00 UTC.
    pub fn instant(self) -> DateTime<Utc> {
        match self {
            TimeValue::Date(date) => date.and_time(NaiveTime::MIN).and_utc(),
            TimeValue::Instant(instant) => instant,
        }
    }
}

impl From<NaiveDate> for TimeValue {
    fn from(date: NaiveDate) -> Self {
        TimeValue::Date(date)
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(instant: DateTime<Utc>) -> Self {
        TimeValue::Instant(instant)
    }
}

/// A fact type's answer when asked for its actual-time attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActualTimeField {
    /// The fact kind does not define the attribute at all.
    Undefined,
    /// The attribute exists but carries no value on this instance.
    Unset,
    /// The attribute carries a value.
    Value(TimeValue),
}

/// Resolve a fact's `occurred_at` from its candidate sources.
///
/// Precedence: an explicit `at` argument, then the stream's configured
/// actual-time attribute read off the fact, then `None` (meaning the log's
/// own `recorded_at` applies at insert time). Total over its inputs: every
/// combination either resolves or yields one of the two named
/// configuration errors.
///
/// # Arguments
///
/// * `explicit` - The `at` argument passed to `append`, if any.
/// * `attribute` - The configured attribute name paired with the fact's
///   answer for it; `None` when the stream declares no attribute.
/// * `kind` - The fact kind tag, for error reporting.
///
/// # Errors
///
/// [`AppendError::MissingActualTimeAttribute`] when an attribute is
/// declared but the fact kind does not define it, and
/// [`AppendError::ConflictingActualTime`] when the explicit argument and
/// the attribute value denote different instants after normalization.
pub(crate) fn resolve_occurred_at(
    explicit: Option<TimeValue>,
    attribute: Option<(&str, ActualTimeField)>,
    kind: &str,
) -> Result<Option<DateTime<Utc>>, AppendError> {
    let from_fact = match attribute {
        Some((name, ActualTimeField::Undefined)) => {
            return Err(AppendError::MissingActualTimeAttribute {
                attribute: name.to_string(),
                kind: kind.to_string(),
            });
        }
        Some((_, ActualTimeField::Unset)) | None => None,
        Some((name, ActualTimeField::Value(value))) => Some((name, value)),
    };

    match (explicit, from_fact) {
        (Some(explicit), Some((name, from_fact))) if explicit.instant() != from_fact.instant() => {
            Err(AppendError::ConflictingActualTime {
                attribute: name.to_string(),
                explicit: explicit.instant(),
                from_fact: from_fact.instant(),
            })
        }
        (Some(explicit), _) => Ok(Some(explicit.instant())),
        (None, Some((_, from_fact))) => Ok(Some(from_fact.instant())),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn feb_15() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 15, 12, 0, 0).unwrap()
    }

    fn mar_1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn bare_date_normalizes_to_start_of_day() {
        let value = TimeValue::Date(NaiveDate::from_ymd_opt(2025, 2, 15).unwrap());
        assert_eq!(
            value.instant(),
            Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn explicit_argument_wins_when_no_attribute_is_declared() {
        let resolved = resolve_occurred_at(Some(feb_15().into()), None, "salary.set").unwrap();
        assert_eq!(resolved, Some(feb_15()));
    }

    #[test]
    fn attribute_value_used_when_no_explicit_argument() {
        let resolved = resolve_occurred_at(
            None,
            Some(("at", ActualTimeField::Value(feb_15().into()))),
            "salary.set",
        )
        .unwrap();
        assert_eq!(resolved, Some(feb_15()));
    }

    #[test]
    fn unset_attribute_falls_through_to_recorded_time() {
        let resolved =
            resolve_occurred_at(None, Some(("at", ActualTimeField::Unset)), "salary.set").unwrap();
        assert_eq!(resolved, None);
    }

    #[test]
    fn nothing_supplied_defaults_to_recorded_time() {
        let resolved = resolve_occurred_at(None, None, "salary.set").unwrap();
        assert_eq!(resolved, None);
    }

    #[test]
    fn agreement_between_explicit_and_attribute_resolves() {
        let resolved = resolve_occurred_at(
            Some(feb_15().into()),
            Some(("at", ActualTimeField::Value(feb_15().into()))),
            "salary.set",
        )
        .unwrap();
        assert_eq!(resolved, Some(feb_15()));
    }

    #[test]
    fn conflict_between_explicit_and_attribute_fails() {
        let err = resolve_occurred_at(
            Some(mar_1().into()),
            Some(("at", ActualTimeField::Value(feb_15().into()))),
            "salary.set",
        )
        .unwrap_err();
        assert!(matches!(err, AppendError::ConflictingActualTime { .. }));
    }

    #[test]
    fn declared_attribute_undefined_on_fact_fails() {
        let err = resolve_occurred_at(None, Some(("at", ActualTimeField::Undefined)), "no_at")
            .unwrap_err();
        assert!(matches!(
            err,
            AppendError::MissingActualTimeAttribute { .. }
        ));
    }

    #[test]
    fn bare_date_agrees_with_its_start_of_day_instant() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 15).unwrap();
        let start_of_day = Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap();

        let resolved = resolve_occurred_at(
            Some(start_of_day.into()),
            Some(("at", ActualTimeField::Value(date.into()))),
            "salary.set",
        )
        .unwrap();
        assert_eq!(resolved, Some(start_of_day));
    }

    #[test]
    fn bare_date_conflicts_with_a_different_instant() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 15).unwrap();

        let err = resolve_occurred_at(
            Some(mar_1().into()),
            Some(("at", ActualTimeField::Value(date.into()))),
            "salary.set",
        )
        .unwrap_err();
        assert!(matches!(err, AppendError::ConflictingActualTime { .. }));
    }
}
