//! Output filtering: which computed values are materialized into a result.

use std::collections::{BTreeMap, BTreeSet};

use crate::result::ResultMap;
use crate::value::{ComputationTargetType, ValueSpecification};

/// Visibility of computed values for one category of target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResultOutputMode {
    /// Nothing is retained. Values may still be computed when something else
    /// needs them as an input.
    None,
    /// Only outputs requested as terminal in the calculation configuration.
    #[default]
    TerminalOutputs,
    /// Every computed node, for introspection and debugging.
    All,
}

impl ResultOutputMode {
    /// Whether `spec` is retained given the graph's terminal outputs.
    pub fn should_output(
        &self,
        spec: &ValueSpecification,
        terminal_outputs: &BTreeSet<ValueSpecification>,
    ) -> bool {
        match self {
            ResultOutputMode::None => false,
            ResultOutputMode::TerminalOutputs => terminal_outputs.contains(spec),
            ResultOutputMode::All => true,
        }
    }
}

/// Terminal outputs of a compiled graph, per calculation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerminalOutputs {
    by_configuration: BTreeMap<String, BTreeSet<ValueSpecification>>,
}

impl TerminalOutputs {
    /// No terminal outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `spec` as a terminal output of `configuration`.
    pub fn insert(&mut self, configuration: impl Into<String>, spec: ValueSpecification) {
        self.by_configuration
            .entry(configuration.into())
            .or_default()
            .insert(spec);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, configuration: impl Into<String>, spec: ValueSpecification) -> Self {
        self.insert(configuration, spec);
        self
    }

    /// Terminal outputs of one configuration.
    pub fn configuration(&self, configuration: &str) -> Option<&BTreeSet<ValueSpecification>> {
        self.by_configuration.get(configuration)
    }

    /// Whether `spec` is a terminal output of `configuration`.
    pub fn contains(&self, configuration: &str, spec: &ValueSpecification) -> bool {
        self.configuration(configuration)
            .is_some_and(|outputs| outputs.contains(spec))
    }

    /// Configuration names with at least one terminal output.
    pub fn configuration_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_configuration.keys().map(String::as_str)
    }
}

/// Per-category output policy of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResultModelDefinition {
    /// Aggregate grouping nodes.
    pub aggregate_outputs: ResultOutputMode,
    /// Individual items.
    pub position_outputs: ResultOutputMode,
    /// Sub-items.
    pub trade_outputs: ResultOutputMode,
    /// Classifiers.
    pub security_outputs: ResultOutputMode,
    /// Context-free values.
    pub primitive_outputs: ResultOutputMode,
}

impl Default for ResultModelDefinition {
    fn default() -> Self {
        Self::uniform(ResultOutputMode::TerminalOutputs)
    }
}

impl ResultModelDefinition {
    /// The same mode for every category.
    pub fn uniform(mode: ResultOutputMode) -> Self {
        Self {
            aggregate_outputs: mode,
            position_outputs: mode,
            trade_outputs: mode,
            security_outputs: mode,
            primitive_outputs: mode,
        }
    }

    /// Set the mode of one category.
    pub fn with_mode(mut self, target_type: ComputationTargetType, mode: ResultOutputMode) -> Self {
        match target_type {
            ComputationTargetType::PortfolioNode => self.aggregate_outputs = mode,
            ComputationTargetType::Position => self.position_outputs = mode,
            ComputationTargetType::Trade => self.trade_outputs = mode,
            ComputationTargetType::Security => self.security_outputs = mode,
            ComputationTargetType::Primitive => self.primitive_outputs = mode,
        }
        self
    }

    /// Mode of one category.
    pub fn output_mode(&self, target_type: ComputationTargetType) -> ResultOutputMode {
        match target_type {
            ComputationTargetType::PortfolioNode => self.aggregate_outputs,
            ComputationTargetType::Position => self.position_outputs,
            ComputationTargetType::Trade => self.trade_outputs,
            ComputationTargetType::Security => self.security_outputs,
            ComputationTargetType::Primitive => self.primitive_outputs,
        }
    }

    /// Whether `spec`, computed in `configuration`, is retained.
    pub fn should_output(
        &self,
        configuration: &str,
        spec: &ValueSpecification,
        terminal_outputs: &TerminalOutputs,
    ) -> bool {
        let unknown = BTreeSet::new();
        let terminal = terminal_outputs.configuration(configuration).unwrap_or(&unknown);
        self.output_mode(spec.target.target_type).should_output(spec, terminal)
    }

    /// Drop every entry of `results` this definition does not retain.
    pub fn filter(&self, results: &mut ResultMap, terminal_outputs: &TerminalOutputs) {
        results.retain(|configuration, spec| {
            self.should_output(configuration, spec, terminal_outputs)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ComputedValueResult;
    use crate::value::{TargetSpecification, ValueKey};

    fn spec(target_type: ComputationTargetType, name: &str) -> ValueSpecification {
        ValueSpecification::new(TargetSpecification::new(target_type, "T1"), ValueKey::new(name))
    }

    #[test]
    fn test_none_and_all_are_total() {
        let terminal: BTreeSet<_> = [spec(ComputationTargetType::Position, "PV")].into();
        for target_type in [
            ComputationTargetType::PortfolioNode,
            ComputationTargetType::Position,
            ComputationTargetType::Trade,
            ComputationTargetType::Security,
            ComputationTargetType::Primitive,
        ] {
            for name in ["PV", "Intermediate"] {
                let s = spec(target_type, name);
                assert!(!ResultOutputMode::None.should_output(&s, &terminal));
                assert!(ResultOutputMode::All.should_output(&s, &terminal));
            }
        }
    }

    #[test]
    fn test_terminal_outputs_is_membership() {
        let pv = spec(ComputationTargetType::Position, "PV");
        let inner = spec(ComputationTargetType::Position, "Intermediate");
        let terminal: BTreeSet<_> = [pv.clone()].into();
        assert!(ResultOutputMode::TerminalOutputs.should_output(&pv, &terminal));
        assert!(!ResultOutputMode::TerminalOutputs.should_output(&inner, &terminal));
    }

    #[test]
    fn test_filter_applies_mode_per_category() {
        let pv = spec(ComputationTargetType::Position, "PV");
        let position_inner = spec(ComputationTargetType::Position, "Intermediate");
        let node_pv = spec(ComputationTargetType::PortfolioNode, "PV");
        let curve = spec(ComputationTargetType::Primitive, "Curve");

        let mut results = ResultMap::new();
        for s in [&pv, &position_inner, &node_pv, &curve] {
            results.insert("Default", s.clone(), ComputedValueResult::new(1.0));
        }
        let terminal = TerminalOutputs::new()
            .with("Default", pv.clone())
            .with("Default", node_pv.clone());

        let definition = ResultModelDefinition::default()
            .with_mode(ComputationTargetType::PortfolioNode, ResultOutputMode::None)
            .with_mode(ComputationTargetType::Primitive, ResultOutputMode::All);
        definition.filter(&mut results, &terminal);

        assert!(results.get("Default", &pv).is_some());
        assert!(results.get("Default", &position_inner).is_none());
        assert!(results.get("Default", &node_pv).is_none());
        assert!(results.get("Default", &curve).is_some());
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_terminal_outputs_are_per_configuration() {
        let pv = spec(ComputationTargetType::Position, "PV");
        let terminal = TerminalOutputs::new().with("Default", pv.clone());
        let definition = ResultModelDefinition::default();
        assert!(definition.should_output("Default", &pv, &terminal));
        assert!(!definition.should_output("Stress", &pv, &terminal));
    }

    #[test]
    fn test_definition_agrees_with_its_modes() {
        let pv = spec(ComputationTargetType::Position, "PV");
        let inner = spec(ComputationTargetType::Position, "Intermediate");
        let terminal = TerminalOutputs::new().with("Default", pv.clone());
        let empty = BTreeSet::new();

        for mode in [
            ResultOutputMode::None,
            ResultOutputMode::TerminalOutputs,
            ResultOutputMode::All,
        ] {
            let definition =
                ResultModelDefinition::default().with_mode(ComputationTargetType::Position, mode);
            for s in [&pv, &inner] {
                let in_default = terminal.configuration("Default").unwrap();
                assert_eq!(
                    definition.should_output("Default", s, &terminal),
                    mode.should_output(s, in_default)
                );
                assert_eq!(
                    definition.should_output("Stress", s, &terminal),
                    mode.should_output(s, &empty)
                );
            }
        }
    }
}
