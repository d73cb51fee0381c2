//! Recursive constructor-driven object graph builder

use crate::error::{Result, ScriptbindError};
use crate::introspect::{Arguments, TypeIntrospector};
use crate::registry::Registry;
use crate::types::{downcast, Instance, Tag, TypeDescriptor};
use std::any::Any;
use std::sync::Arc;

/// Default limit on nested constructor calls
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Builds concrete types by resolving their constructor parameters
///
/// Parameters are resolved left to right, depth first. Abstract parameter
/// types must be bound (untagged) in the registry; concrete ones are built
/// recursively without consulting the registry. Only the primary
/// constructor reported by the introspector is considered.
pub struct Resolver {
    introspector: Arc<dyn TypeIntrospector>,
    max_depth: usize,
}

impl Resolver {
    /// Create a resolver reading metadata from `introspector`
    pub fn new(introspector: Arc<dyn TypeIntrospector>) -> Self {
        Self {
            introspector,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Create a resolver sharing the registry's introspector
    pub fn for_registry(registry: &Registry) -> Self {
        Self::new(Arc::clone(registry.introspector()))
    }

    /// Limit how many constructors may be nested
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Build a fully wired instance of `concrete`
    pub fn resolve_dependencies_for(
        &self,
        registry: &Registry,
        concrete: &str,
    ) -> Result<Instance> {
        let mut path = Vec::new();
        self.build(registry, concrete, &mut path)
    }

    /// Build `concrete` and downcast it
    pub fn resolve_as<T: Any + Send + Sync>(
        &self,
        registry: &Registry,
        concrete: &str,
    ) -> Result<Arc<T>> {
        downcast(&self.resolve_dependencies_for(registry, concrete)?)
    }

    /// Constructor parameter types of `concrete`, in declaration order
    pub fn list_dependencies_in(&self, concrete: &str) -> Result<Vec<TypeDescriptor>> {
        Ok(self
            .introspector
            .constructor_parameters(concrete)?
            .into_iter()
            .map(|p| p.ty)
            .collect())
    }

    fn build(
        &self,
        registry: &Registry,
        type_name: &str,
        path: &mut Vec<String>,
    ) -> Result<Instance> {
        if path.iter().any(|seen| seen == type_name) {
            let mut chain = path.clone();
            chain.push(type_name.to_string());
            return Err(ScriptbindError::CyclicDependency { chain });
        }
        if path.len() >= self.max_depth {
            return Err(ScriptbindError::Instantiation {
                type_name: type_name.to_string(),
                reason: format!("resolution depth {} exceeded", self.max_depth),
            });
        }

        let parameters = self.introspector.constructor_parameters(type_name)?;
        tracing::debug!(
            "Resolving {} ({} parameters, depth {})",
            type_name,
            parameters.len(),
            path.len()
        );

        path.push(type_name.to_string());
        let mut arguments = Vec::with_capacity(parameters.len());
        for parameter in &parameters {
            let dependency = parameter.ty.name.as_str();
            let value = if self.introspector.is_abstract(dependency) {
                if !registry.contains(dependency, &Tag::Undefined) {
                    return Err(ScriptbindError::ParameterNotBound {
                        type_name: dependency.to_string(),
                        parameter: parameter.name.clone(),
                        owner: type_name.to_string(),
                    });
                }
                registry.get_instance(dependency)?
            } else {
                self.build(registry, dependency, path)?
            };
            arguments.push(value);
        }
        path.pop();

        self.introspector.construct(type_name, Arguments::new(arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::TypeCatalog;
    use crate::types::{instance, Parameter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    #[derive(Debug)]
    struct Clock;

    #[derive(Debug)]
    struct Service {
        config: Arc<Config>,
        #[allow(dead_code)]
        clock: Arc<Clock>,
    }

    fn catalog(log: Arc<Mutex<Vec<&'static str>>>) -> TypeCatalog {
        let mut catalog = TypeCatalog::new();
        let config_log = Arc::clone(&log);
        let clock_log = Arc::clone(&log);
        catalog
            .declare_abstract("Store")
            .declare_concrete("Config", vec![], move |_| {
                config_log.lock().unwrap().push("Config");
                Ok(instance(Config {
                    url: "mem://".to_string(),
                }))
            })
            .declare_concrete("Clock", vec![], move |_| {
                clock_log.lock().unwrap().push("Clock");
                Ok(instance(Clock))
            })
            .declare_concrete(
                "Service",
                vec![
                    Parameter::new("config", "Config"),
                    Parameter::new("clock", "Clock"),
                ],
                |args| {
                    Ok(instance(Service {
                        config: args.get(0)?,
                        clock: args.get(1)?,
                    }))
                },
            )
            .declare_concrete(
                "Repository",
                vec![
                    Parameter::new("store", "Store"),
                    Parameter::new("config", "Config"),
                    Parameter::new("clock", "Clock?"),
                ],
                |_| Ok(instance(())),
            )
            .declare_concrete("Left", vec![Parameter::new("right", "Right")], |_| {
                Ok(instance(()))
            })
            .declare_concrete("Right", vec![Parameter::new("left", "Left")], |_| {
                Ok(instance(()))
            });
        catalog
    }

    fn setup() -> (Registry, Resolver, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::with_introspector(Arc::new(catalog(Arc::clone(&log))));
        let resolver = Resolver::for_registry(&registry);
        (registry, resolver, log)
    }

    #[test]
    fn test_concrete_graph_ignores_bindings() {
        let (mut registry, resolver, log) = setup();
        let lookups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lookups);
        registry.bind("Config", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(instance(Config {
                url: "bound://".to_string(),
            }))
        });

        let service = resolver.resolve_as::<Service>(&registry, "Service").unwrap();

        assert_eq!(service.config.url, "mem://");
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
        assert_eq!(*log.lock().unwrap(), vec!["Config", "Clock"]);
    }

    #[test]
    fn test_unbound_abstract_parameter() {
        let (registry, resolver, _) = setup();

        let err = resolver
            .resolve_dependencies_for(&registry, "Repository")
            .unwrap_err();

        match err {
            ScriptbindError::ParameterNotBound {
                type_name,
                parameter,
                owner,
            } => {
                assert_eq!(type_name, "Store");
                assert_eq!(parameter, "store");
                assert_eq!(owner, "Repository");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bound_abstract_parameter() {
        let (mut registry, resolver, _) = setup();
        registry.bind("Store", |_| Ok(instance("store".to_string())));

        assert!(resolver
            .resolve_dependencies_for(&registry, "Repository")
            .is_ok());
    }

    #[test]
    fn test_list_dependencies_in_declaration_order() {
        let (_, resolver, log) = setup();

        let deps = resolver.list_dependencies_in("Repository").unwrap();

        let names: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
        assert_eq!(names, vec!["Store", "Config", "Clock?"]);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let (registry, resolver, _) = setup();

        let err = resolver
            .resolve_dependencies_for(&registry, "Left")
            .unwrap_err();

        match err {
            ScriptbindError::CyclicDependency { chain } => {
                assert_eq!(chain, vec!["Left", "Right", "Left"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_depth_guard() {
        let (registry, _, _) = setup();
        let resolver = Resolver::for_registry(&registry).with_max_depth(1);

        assert!(matches!(
            resolver.resolve_dependencies_for(&registry, "Service"),
            Err(ScriptbindError::Instantiation { .. })
        ));
    }

    #[test]
    fn test_unknown_type() {
        let (registry, resolver, _) = setup();
        assert!(matches!(
            resolver.resolve_dependencies_for(&registry, "Nope"),
            Err(ScriptbindError::UnknownType(_))
        ));
    }
}
