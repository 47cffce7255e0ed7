//! Result models produced by a cycle.
//!
//! A result maps calculation configuration → target → value key to a
//! [`ComputedValueResult`]. Maps are ordered so that iteration, and therefore
//! everything derived from it such as deltas, is deterministic.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::cycle::{CycleId, ProcessId};
use crate::log::AggregatedExecutionLog;
use crate::value::{TargetSpecification, Value, ValueKey, ValueSpecification};

/// A computed value together with its execution log.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedValueResult {
    /// The value.
    pub value: Value,
    /// Diagnostics for the value and its inputs.
    pub log: AggregatedExecutionLog,
}

impl ComputedValueResult {
    /// A value with an empty log.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            log: AggregatedExecutionLog::empty(),
        }
    }

    /// A value with the given log.
    pub fn with_log(value: impl Into<Value>, log: AggregatedExecutionLog) -> Self {
        Self {
            value: value.into(),
            log,
        }
    }
}

/// Values per target for one calculation configuration.
pub type TargetResults = BTreeMap<TargetSpecification, BTreeMap<ValueKey, ComputedValueResult>>;

/// The three-level map shared by full and delta results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultMap {
    configurations: BTreeMap<String, TargetResults>,
}

impl ResultMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(
        &mut self,
        configuration: impl Into<String>,
        spec: ValueSpecification,
        result: ComputedValueResult,
    ) {
        self.configurations
            .entry(configuration.into())
            .or_default()
            .entry(spec.target)
            .or_default()
            .insert(spec.key, result);
    }

    /// Look up a value.
    pub fn get(&self, configuration: &str, spec: &ValueSpecification) -> Option<&ComputedValueResult> {
        self.configurations
            .get(configuration)?
            .get(&spec.target)?
            .get(&spec.key)
    }

    /// Configuration names present in the map.
    pub fn configuration_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.configurations.keys().map(String::as_str)
    }

    /// Results of one configuration.
    pub fn configuration(&self, name: &str) -> Option<&TargetResults> {
        self.configurations.get(name)
    }

    /// Iterate every entry in configuration, target, key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ValueSpecification, &ComputedValueResult)> + '_ {
        self.configurations.iter().flat_map(|(config, targets)| {
            targets.iter().flat_map(move |(target, values)| {
                values.iter().map(move |(key, result)| {
                    (
                        config.as_str(),
                        ValueSpecification::new(target.clone(), key.clone()),
                        result,
                    )
                })
            })
        })
    }

    /// Keep only entries for which `keep` returns true, dropping emptied levels.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &ValueSpecification) -> bool) {
        for (config, targets) in self.configurations.iter_mut() {
            for (target, values) in targets.iter_mut() {
                values.retain(|key, _| {
                    keep(config.as_str(), &ValueSpecification::new(target.clone(), key.clone()))
                });
            }
            targets.retain(|_, values| !values.is_empty());
        }
        self.configurations.retain(|_, targets| !targets.is_empty());
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.configurations
            .values()
            .flat_map(|targets| targets.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns true if there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity and timing shared by full and delta results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMetadata {
    /// Process that produced the result.
    pub process_id: ProcessId,
    /// Cycle that produced the result.
    pub cycle_id: CycleId,
    /// Valuation time the cycle ran for.
    pub valuation_time: SystemTime,
    /// When the result was produced. Deltas refer back to this.
    pub result_timestamp: SystemTime,
}

/// Every retained value of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationResult {
    /// Identity and timing.
    pub metadata: ResultMetadata,
    /// The values.
    pub results: ResultMap,
}

impl ComputationResult {
    /// Create a full result.
    pub fn new(metadata: ResultMetadata, results: ResultMap) -> Self {
        Self { metadata, results }
    }
}

/// The values of one cycle that changed relative to the previous full result.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaResult {
    /// Identity and timing of the cycle the delta belongs to.
    pub metadata: ResultMetadata,
    /// Timestamp of the full result the delta was computed against, so a client
    /// can check it applies the delta to the right base.
    pub previous_result_timestamp: Option<SystemTime>,
    /// The changed values.
    pub results: ResultMap,
}

impl DeltaResult {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ComputationTargetType;

    fn spec(target: &str, name: &str) -> ValueSpecification {
        ValueSpecification::new(
            TargetSpecification::new(ComputationTargetType::Position, target),
            ValueKey::new(name),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = ResultMap::new();
        map.insert("Default", spec("P1", "PV"), ComputedValueResult::new(1.5));
        map.insert("Default", spec("P1", "Delta"), ComputedValueResult::new(0.2));
        map.insert("Stress", spec("P2", "PV"), ComputedValueResult::new(3.0));

        assert_eq!(map.len(), 3);
        assert_eq!(
            map.get("Default", &spec("P1", "PV")).unwrap().value,
            Value::Double(1.5)
        );
        assert!(map.get("Stress", &spec("P1", "PV")).is_none());
        assert_eq!(
            map.configuration_names().collect::<Vec<_>>(),
            ["Default", "Stress"]
        );
    }

    #[test]
    fn test_retain_prunes_empty_levels() {
        let mut map = ResultMap::new();
        map.insert("Default", spec("P1", "PV"), ComputedValueResult::new(1.0));
        map.insert("Stress", spec("P2", "PV"), ComputedValueResult::new(2.0));
        map.retain(|config, _| config == "Default");
        assert_eq!(map.len(), 1);
        assert!(map.configuration("Stress").is_none());
    }

    #[test]
    fn test_iter_is_ordered() {
        let mut map = ResultMap::new();
        map.insert("B", spec("P2", "X"), ComputedValueResult::new(1.0));
        map.insert("A", spec("P1", "Y"), ComputedValueResult::new(2.0));
        map.insert("A", spec("P1", "X"), ComputedValueResult::new(3.0));
        let order: Vec<(String, String)> = map
            .iter()
            .map(|(c, s, _)| (c.to_string(), s.key.name))
            .collect();
        assert_eq!(
            order,
            [
                ("A".to_string(), "X".to_string()),
                ("A".to_string(), "Y".to_string()),
                ("B".to_string(), "X".to_string()),
            ]
        );
    }
}
