//! Script session: registry, resolver, evaluator and contract checks in one place

use crate::evaluator::DynamicEvaluator;
use crate::host::Fragment;
use scriptbind_core::introspect::TypeIntrospector;
use scriptbind_core::{
    Instance, Registry, Resolver, Result, RuntimeConfig, ScriptContract, SignatureExtractor,
    SignatureMatcher, TypeCatalog,
};
use std::sync::Arc;

/// Outcome of [`ScriptSession::load`]
#[derive(Debug, Clone)]
pub struct LoadedScript {
    pub contract: ScriptContract,
    pub fragment: Arc<Fragment>,
    /// Symbol the contract was checked against
    pub symbol: Option<String>,
    /// Normalized declared signature
    pub declared: Option<String>,
    /// Normalized reflected signature
    pub actual: Option<String>,
    /// `None` when the script declares no contract
    pub matches: Option<bool>,
}

impl LoadedScript {
    /// The script declared a contract and the runtime type disagreed
    pub fn is_mismatch(&self) -> bool {
        self.matches == Some(false)
    }
}

/// Everything needed to load scripts and build objects for one application
pub struct ScriptSession {
    registry: Registry,
    resolver: Resolver,
    evaluator: DynamicEvaluator,
    extractor: SignatureExtractor,
    matcher: SignatureMatcher,
}

impl ScriptSession {
    /// Build a session from configuration and the application's type metadata
    pub fn new(config: &RuntimeConfig, catalog: Arc<TypeCatalog>) -> Result<Self> {
        let introspector: Arc<dyn TypeIntrospector> = catalog.clone();
        let mut registry = Registry::with_introspector(introspector);
        registry.apply_config(config, catalog.as_ref());

        let resolver =
            Resolver::for_registry(&registry).with_max_depth(config.max_resolution_depth);
        let evaluator = DynamicEvaluator::from_config(config)?;
        let matcher = SignatureMatcher::with_prefixes(config.builtin_prefixes.iter().cloned())
            .with_policy(config.mismatch_policy);

        tracing::info!(
            "Session ready: {} binding(s), {} host, {:?} mismatch policy",
            registry.bindings().len(),
            evaluator.host().name(),
            matcher.policy()
        );

        Ok(Self {
            registry,
            resolver,
            evaluator,
            extractor: SignatureExtractor::with_marker(config.export_marker.as_str()),
            matcher,
        })
    }

    /// Replace the evaluator, e.g. to use a custom code host
    pub fn with_evaluator(mut self, evaluator: DynamicEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn evaluator(&self) -> &DynamicEvaluator {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut DynamicEvaluator {
        &mut self.evaluator
    }

    pub fn matcher(&self) -> &SignatureMatcher {
        &self.matcher
    }

    /// Evaluate `text` and check it against the contract it declares
    ///
    /// The contract comes from the first exported declaration, or from a
    /// bare `(..) -> ..` header. Exported contracts are compared with the
    /// reflected type of that symbol, bare ones with the type of the
    /// script's final value. Under the enforce policy a mismatch fails the
    /// load after evaluation.
    ///
    /// Only the code host's own deadline applies here; see
    /// [`load_bounded`](Self::load_bounded) for the configured timeout.
    pub fn load(&mut self, text: &str) -> Result<LoadedScript> {
        let contract = self.extractor.contract(text);
        let fragment = self.evaluator.evaluate(text)?;
        self.check_contract(contract, fragment)
    }

    /// Like [`load`](Self::load), bounded by the configured evaluation timeout
    pub async fn load_bounded(&mut self, text: &str) -> Result<LoadedScript> {
        let contract = self.extractor.contract(text);
        let fragment = self.evaluator.evaluate_bounded(text).await?;
        self.check_contract(contract, fragment)
    }

    fn check_contract(
        &self,
        contract: ScriptContract,
        fragment: Arc<Fragment>,
    ) -> Result<LoadedScript> {
        let Some(signature) = contract.signature.as_ref() else {
            tracing::debug!("Script declares no contract");
            return Ok(LoadedScript {
                symbol: None,
                declared: None,
                actual: None,
                matches: None,
                contract,
                fragment,
            });
        };

        let (label, actual) = match contract.symbol.as_deref() {
            Some(name) => (name.to_string(), fragment.symbol_type(name)?.to_string()),
            None => ("<result>".to_string(), fragment.result().type_name()),
        };
        let declared = signature.to_string();
        let matches = self.matcher.check(&label, &declared, &actual)?;

        Ok(LoadedScript {
            symbol: contract.symbol.clone(),
            declared: Some(self.matcher.normalize(&declared)),
            actual: Some(self.matcher.normalize(&actual)),
            matches: Some(matches),
            contract,
            fragment,
        })
    }

    /// Build `concrete` with its constructor dependencies
    pub fn build(&self, concrete: &str) -> Result<Instance> {
        self.resolver.resolve_dependencies_for(&self.registry, concrete)
    }
}
