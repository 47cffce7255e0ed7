//! View definitions, their compiled form, and the market-data permission seam.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::output::{ResultModelDefinition, TerminalOutputs};
use crate::value::ValueSpecification;

/// Identifier of a view definition in an external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewDefinitionId(pub String);

impl ViewDefinitionId {
    /// Create an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ViewDefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The parts of a view definition the controller cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    /// Identifier.
    pub id: ViewDefinitionId,
    /// Human readable name.
    pub name: String,
    /// Version in the external store.
    pub version: u64,
    /// Names of the calculation configurations.
    pub configuration_names: Vec<String>,
    /// Output policy.
    pub result_model: ResultModelDefinition,
}

/// Fetches the latest version of a view definition for introspection.
pub trait ViewDefinitionResolver: Send + Sync + 'static {
    /// Latest definition for `id`, if one exists.
    fn latest(&self, id: &ViewDefinitionId) -> Option<ViewDefinition>;
}

/// A view definition compiled into a dependency graph at a point in time.
///
/// The graph itself is opaque to the controller; only the parts needed for
/// output filtering and permission checks are exposed.
#[derive(Debug, Clone)]
pub struct CompiledViewDefinition {
    definition: ViewDefinition,
    compiled_at: SystemTime,
    terminal_outputs: TerminalOutputs,
    market_data_requirements: BTreeSet<ValueSpecification>,
}

impl CompiledViewDefinition {
    /// Create a compiled definition.
    pub fn new(
        definition: ViewDefinition,
        compiled_at: SystemTime,
        terminal_outputs: TerminalOutputs,
        market_data_requirements: BTreeSet<ValueSpecification>,
    ) -> Self {
        Self {
            definition,
            compiled_at,
            terminal_outputs,
            market_data_requirements,
        }
    }

    /// The definition that was compiled.
    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    /// Valuation time the graph was compiled for.
    pub fn compiled_at(&self) -> SystemTime {
        self.compiled_at
    }

    /// Outputs explicitly requested by each calculation configuration.
    pub fn terminal_outputs(&self) -> &TerminalOutputs {
        &self.terminal_outputs
    }

    /// Live data the graph reads.
    pub fn market_data_requirements(&self) -> &BTreeSet<ValueSpecification> {
        &self.market_data_requirements
    }

    /// Output policy of the compiled view.
    pub fn result_model(&self) -> &ResultModelDefinition {
        &self.definition.result_model
    }

    /// Names of the calculation configurations.
    pub fn configuration_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.definition.configuration_names.iter().map(String::as_str)
    }
}

/// A user on whose behalf a listener receives results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserPrincipal {
    /// User name.
    pub user_name: String,
}

impl UserPrincipal {
    /// Create a principal.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
        }
    }
}

/// Decides which live-data requirements a user may not see.
pub trait MarketDataPermissionProvider: Send + Sync + 'static {
    /// Requirements in `requirements` that `user` is not permitted to see.
    /// An empty set means the user may see everything.
    fn denied_requirements(
        &self,
        user: &UserPrincipal,
        requirements: &BTreeSet<ValueSpecification>,
    ) -> BTreeSet<ValueSpecification>;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl MarketDataPermissionProvider for PermitAll {
    fn denied_requirements(
        &self,
        _user: &UserPrincipal,
        _requirements: &BTreeSet<ValueSpecification>,
    ) -> BTreeSet<ValueSpecification> {
        BTreeSet::new()
    }
}

/// A compiled definition and the permission provider that goes with it.
///
/// They are swapped together so readers never see one without the other.
#[derive(Clone)]
pub struct CompilationOutput {
    /// The compiled definition.
    pub compiled: Arc<CompiledViewDefinition>,
    /// Permissions for the live data it reads.
    pub permissions: Arc<dyn MarketDataPermissionProvider>,
}

impl CompilationOutput {
    /// Pair a compiled definition with its permission provider.
    pub fn new(
        compiled: Arc<CompiledViewDefinition>,
        permissions: Arc<dyn MarketDataPermissionProvider>,
    ) -> Self {
        Self {
            compiled,
            permissions,
        }
    }

    /// Whether `user` may see the live data backing this compilation.
    /// Listeners without a user are always permitted.
    pub fn has_market_data_permissions(&self, user: Option<&UserPrincipal>) -> bool {
        match user {
            None => true,
            Some(user) => self
                .permissions
                .denied_requirements(user, self.compiled.market_data_requirements())
                .is_empty(),
        }
    }
}

impl fmt::Debug for CompilationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationOutput")
            .field("compiled", &self.compiled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{TargetSpecification, ValueKey};

    struct DenyUser(&'static str);

    impl MarketDataPermissionProvider for DenyUser {
        fn denied_requirements(
            &self,
            user: &UserPrincipal,
            requirements: &BTreeSet<ValueSpecification>,
        ) -> BTreeSet<ValueSpecification> {
            if user.user_name == self.0 {
                requirements.clone()
            } else {
                BTreeSet::new()
            }
        }
    }

    fn compiled() -> Arc<CompiledViewDefinition> {
        let ticker = ValueSpecification::new(
            TargetSpecification::primitive("AAPL"),
            ValueKey::new("MarketValue"),
        );
        Arc::new(CompiledViewDefinition::new(
            ViewDefinition {
                id: ViewDefinitionId::new("view"),
                name: "View".to_string(),
                version: 1,
                configuration_names: vec!["Default".to_string()],
                result_model: ResultModelDefinition::default(),
            },
            SystemTime::UNIX_EPOCH,
            TerminalOutputs::new(),
            [ticker].into(),
        ))
    }

    #[test]
    fn test_permission_check_per_user() {
        let output = CompilationOutput::new(compiled(), Arc::new(DenyUser("mallory")));
        assert!(output.has_market_data_permissions(None));
        assert!(output.has_market_data_permissions(Some(&UserPrincipal::new("alice"))));
        assert!(!output.has_market_data_permissions(Some(&UserPrincipal::new("mallory"))));
    }

    #[test]
    fn test_permit_all() {
        let output = CompilationOutput::new(compiled(), Arc::new(PermitAll));
        assert!(output.has_market_data_permissions(Some(&UserPrincipal::new("mallory"))));
    }
}
