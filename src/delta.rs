//! Change-only results between consecutive cycles.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::result::{ComputationResult, DeltaResult, ResultMap};
use crate::value::{Value, ValueKind};

/// Decides whether two values of the same kind differ enough to be reported.
pub trait DeltaComparer: Send + Sync + 'static {
    /// Returns true if moving from `previous` to `current` is a change.
    fn is_delta(&self, previous: &Value, current: &Value) -> bool;
}

/// Numeric comparer that buckets values by flooring at a number of decimal
/// places: `a` and `b` are equal iff `floor(a * 10^d) == floor(b * 10^d)`.
///
/// Flooring rather than rounding means two values either side of a bucket
/// edge are a change however close they are, while values further apart in the
/// same bucket are not.
#[derive(Debug, Clone, Copy)]
pub struct NumberComparer {
    decimal_places: u32,
    multiplier: f64,
}

impl NumberComparer {
    /// Comparer with a threshold of `decimal_places`.
    pub fn new(decimal_places: u32) -> Self {
        Self {
            decimal_places,
            multiplier: 10f64.powi(decimal_places as i32),
        }
    }

    /// The threshold.
    pub fn decimal_places(&self) -> u32 {
        self.decimal_places
    }

    fn bucket(&self, value: f64) -> f64 {
        (value * self.multiplier).floor()
    }
}

impl DeltaComparer for NumberComparer {
    fn is_delta(&self, previous: &Value, current: &Value) -> bool {
        match (previous.as_f64(), current.as_f64()) {
            (Some(a), Some(b)) => {
                let (a, b) = (self.bucket(a), self.bucket(b));
                // NaN is never equal to itself but is no change from NaN.
                a != b && !(a.is_nan() && b.is_nan())
            }
            _ => !previous.is_identical(current),
        }
    }
}

/// Per-process policy for what counts as a change.
///
/// Comparers are registered by [`ValueKind`]; values with no registered
/// comparer fall back to exact equality.
#[derive(Clone, Default)]
pub struct DeltaDefinition {
    comparers: BTreeMap<ValueKind, Arc<dyn DeltaComparer>>,
}

impl DeltaDefinition {
    /// Exact equality for everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `comparer` for values of `kind`.
    pub fn with_comparer(mut self, kind: ValueKind, comparer: impl DeltaComparer) -> Self {
        self.comparers.insert(kind, Arc::new(comparer));
        self
    }

    /// Register a [`NumberComparer`] for both numeric kinds.
    pub fn with_number_comparer(self, decimal_places: u32) -> Self {
        let comparer = NumberComparer::new(decimal_places);
        self.with_comparer(ValueKind::Double, comparer)
            .with_comparer(ValueKind::Integer, comparer)
    }

    /// Comparer registered for `kind`.
    pub fn comparer(&self, kind: ValueKind) -> Option<&Arc<dyn DeltaComparer>> {
        self.comparers.get(&kind)
    }

    /// Whether moving from `previous` to `current` is a change.
    pub fn is_delta(&self, previous: &Value, current: &Value) -> bool {
        if previous.kind() != current.kind() {
            return true;
        }
        match self.comparer(current.kind()) {
            Some(comparer) => comparer.is_delta(previous, current),
            None => !previous.is_identical(current),
        }
    }
}

impl fmt::Debug for DeltaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaDefinition")
            .field("comparers", &self.comparers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Entries of `current` that changed relative to `previous`.
///
/// An entry is a change when it is missing from `previous` or `definition`
/// says its value moved. Entries only in `previous` are not reported. Each
/// changed entry carries the new value and its own log. With no `previous`
/// every entry is a change.
pub fn compute_delta(
    definition: &DeltaDefinition,
    previous: Option<&ComputationResult>,
    current: &ComputationResult,
) -> DeltaResult {
    let mut results = ResultMap::new();
    for (configuration, spec, result) in current.results.iter() {
        let changed = match previous.and_then(|p| p.results.get(configuration, &spec)) {
            None => true,
            Some(old) => definition.is_delta(&old.value, &result.value),
        };
        if changed {
            results.insert(configuration, spec, result.clone());
        }
    }
    DeltaResult {
        metadata: current.metadata.clone(),
        previous_result_timestamp: previous.map(|p| p.metadata.result_timestamp),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::{CycleId, ProcessId};
    use crate::log::{AggregatedExecutionLog, ExecutionLog, ExecutionLogMode, LogLevel};
    use crate::result::{ComputedValueResult, ResultMetadata};
    use crate::value::{TargetSpecification, ValueKey, ValueSpecification};
    use std::time::{Duration, SystemTime};

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(TargetSpecification::primitive("T"), ValueKey::new(name))
    }

    fn result(sequence: u64, values: &[(&str, Value)]) -> ComputationResult {
        let mut results = ResultMap::new();
        for (name, value) in values {
            results.insert("Default", spec(name), ComputedValueResult::new(value.clone()));
        }
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(sequence);
        ComputationResult::new(
            ResultMetadata {
                process_id: ProcessId(1),
                cycle_id: CycleId {
                    process: ProcessId(1),
                    sequence,
                },
                valuation_time: at,
                result_timestamp: at,
            },
            results,
        )
    }

    #[test]
    fn test_number_comparer_floor_buckets() {
        let d2 = NumberComparer::new(2);
        assert!(!d2.is_delta(&Value::Double(1.004), &Value::Double(1.006)));
        assert!(!d2.is_delta(&Value::Double(1.004), &Value::Double(1.005)));
        assert!(d2.is_delta(&Value::Double(0.009), &Value::Double(0.010)));
    }

    #[test]
    fn test_number_comparer_boundary_asymmetry() {
        let d2 = NumberComparer::new(2);
        // 0.002 apart across zero: buckets -1 and 0.
        assert!(d2.is_delta(&Value::Double(-0.001), &Value::Double(0.001)));
        // 0.008 apart inside one bucket.
        assert!(!d2.is_delta(&Value::Double(0.001), &Value::Double(0.009)));
    }

    #[test]
    fn test_number_comparer_signed_zero_and_nan() {
        let d2 = NumberComparer::new(2);
        assert!(!d2.is_delta(&Value::Double(-0.0), &Value::Double(0.0)));
        assert!(!d2.is_delta(&Value::Double(0.0), &Value::Double(-0.0)));
        assert!(!d2.is_delta(&Value::Double(-0.0), &Value::Double(0.004)));
        assert!(!d2.is_delta(&Value::Double(f64::NAN), &Value::Double(f64::NAN)));
        assert!(d2.is_delta(&Value::Double(f64::NAN), &Value::Double(0.0)));
    }

    #[test]
    fn test_number_comparer_mixes_integer_and_double() {
        let d0 = NumberComparer::new(0);
        assert!(!d0.is_delta(&Value::Integer(1), &Value::Double(1.7)));
        assert!(d0.is_delta(&Value::Integer(1), &Value::Integer(2)));
        assert!(d0.is_delta(&Value::Text("a".into()), &Value::Text("b".into())));
    }

    #[test]
    fn test_definition_falls_back_to_equality() {
        let definition = DeltaDefinition::new().with_number_comparer(0);
        assert!(!definition.is_delta(&Value::Double(1.2), &Value::Double(1.9)));
        assert!(definition.is_delta(&Value::Text("a".into()), &Value::Text("b".into())));
        assert!(!definition.is_delta(&Value::Boolean(true), &Value::Boolean(true)));
        assert!(definition.is_delta(&Value::Double(1.0), &Value::Text("1".into())));
        assert!(DeltaDefinition::new().is_delta(&Value::Double(1.2), &Value::Double(1.9)));
    }

    #[test]
    fn test_identical_results_have_empty_delta() {
        let definition = DeltaDefinition::new().with_number_comparer(2);
        let r = result(1, &[("A", Value::Double(1.0)), ("B", Value::Text("x".into()))]);
        let delta = compute_delta(&definition, Some(&r), &r);
        assert!(delta.is_empty());
        assert_eq!(delta.previous_result_timestamp, Some(r.metadata.result_timestamp));
    }

    #[test]
    fn test_delta_contains_changed_and_new_entries_only() {
        let definition = DeltaDefinition::new().with_number_comparer(0);
        let previous = result(1, &[("A", Value::Double(1.0)), ("B", Value::Double(5.0)), ("Gone", Value::Double(0.0))]);
        let current = result(2, &[("A", Value::Double(2.0)), ("B", Value::Double(5.4)), ("C", Value::Double(7.0))]);
        let delta = compute_delta(&definition, Some(&previous), &current);

        let names: Vec<String> = delta.results.iter().map(|(_, s, _)| s.key.name).collect();
        assert_eq!(names, ["A", "C"]);
        assert_eq!(delta.metadata, current.metadata);
    }

    #[test]
    fn test_delta_carries_new_log() {
        let definition = DeltaDefinition::new();
        let previous = result(1, &[("A", Value::Double(1.0))]);
        let mut current = result(2, &[]);
        let mut log = ExecutionLog::new(ExecutionLogMode::Full);
        log.record(LogLevel::Warn, "stale input");
        current.results.insert(
            "Default",
            spec("A"),
            ComputedValueResult::with_log(
                2.0,
                AggregatedExecutionLog::leaf(spec("A"), log, ExecutionLogMode::Full),
            ),
        );
        let delta = compute_delta(&definition, Some(&previous), &current);
        let entry = delta.results.get("Default", &spec("A")).unwrap();
        assert!(entry.log.levels().warn);
        assert_eq!(entry.log.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_no_previous_means_everything_changed() {
        let r = result(1, &[("A", Value::Double(1.0)), ("B", Value::Double(2.0))]);
        let delta = compute_delta(&DeltaDefinition::new(), None, &r);
        assert_eq!(delta.results, r.results);
        assert_eq!(delta.previous_result_timestamp, None);
    }

    #[test]
    fn test_compute_delta_is_deterministic() {
        let definition = DeltaDefinition::new().with_number_comparer(1);
        let previous = result(1, &[("A", Value::Double(1.0)), ("B", Value::Double(2.0))]);
        let current = result(2, &[("A", Value::Double(1.25)), ("B", Value::Double(2.01))]);
        let first = compute_delta(&definition, Some(&previous), &current);
        let second = compute_delta(&definition, Some(&previous), &current);
        assert_eq!(first, second);
        assert_eq!(first.results.len(), 1);
    }
}
