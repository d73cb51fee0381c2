//! Type metadata consumed by the registry and resolver

use crate::error::{Result, ScriptbindError};
use crate::types::{downcast, Instance, Parameter};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of constructor metadata for named types
pub trait TypeIntrospector: Send + Sync {
    /// Whether `type_name` is abstract (must be bound before it can be resolved)
    fn is_abstract(&self, type_name: &str) -> bool;

    /// Primary constructor parameters of `type_name`, in declaration order
    fn constructor_parameters(&self, type_name: &str) -> Result<Vec<Parameter>>;

    /// Build `type_name` from already resolved constructor arguments
    fn construct(&self, type_name: &str, arguments: Arguments) -> Result<Instance>;
}

/// Lists `(abstract type, default implementation)` pairs under a namespace
pub trait NamespaceDiscovery {
    fn discover(&self, namespace: &str) -> Vec<(String, String)>;
}

/// Resolved constructor arguments, in parameter order
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Instance>,
}

impl Arguments {
    pub fn new(values: Vec<Instance>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw argument at `index`
    pub fn instance(&self, index: usize) -> Result<&Instance> {
        self.values.get(index).ok_or_else(|| ScriptbindError::Instantiation {
            type_name: format!("argument #{}", index),
            reason: format!("only {} arguments were supplied", self.values.len()),
        })
    }

    /// Argument at `index`, downcast to `T`
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        downcast(self.instance(index)?)
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arguments")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Constructor closure stored for a concrete type
pub type Constructor = Arc<dyn Fn(Arguments) -> Result<Instance> + Send + Sync>;

enum TypeEntry {
    Abstract {
        default_impl: Option<String>,
    },
    Concrete {
        parameters: Vec<Parameter>,
        constructor: Constructor,
    },
}

/// In-memory type metadata
///
/// Applications declare their types here instead of relying on runtime
/// reflection; tests use it to supply fake metadata.
#[derive(Default)]
pub struct TypeCatalog {
    entries: HashMap<String, TypeEntry>,
}

impl TypeCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an abstract type
    pub fn declare_abstract(&mut self, name: impl Into<String>) -> &mut Self {
        self.entries
            .insert(name.into(), TypeEntry::Abstract { default_impl: None });
        self
    }

    /// Declare an abstract type with a default implementation for namespace scans
    pub fn declare_abstract_with_default(
        &mut self,
        name: impl Into<String>,
        default_impl: impl Into<String>,
    ) -> &mut Self {
        self.entries.insert(
            name.into(),
            TypeEntry::Abstract {
                default_impl: Some(default_impl.into()),
            },
        );
        self
    }

    /// Declare a concrete type and its primary constructor
    pub fn declare_concrete<F>(
        &mut self,
        name: impl Into<String>,
        parameters: Vec<Parameter>,
        constructor: F,
    ) -> &mut Self
    where
        F: Fn(Arguments) -> Result<Instance> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            TypeEntry::Concrete {
                parameters,
                constructor: Arc::new(constructor),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn entry(&self, name: &str) -> Result<&TypeEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| ScriptbindError::UnknownType(name.to_string()))
    }
}

impl TypeIntrospector for TypeCatalog {
    fn is_abstract(&self, type_name: &str) -> bool {
        matches!(self.entries.get(type_name), Some(TypeEntry::Abstract { .. }))
    }

    fn constructor_parameters(&self, type_name: &str) -> Result<Vec<Parameter>> {
        match self.entry(type_name)? {
            TypeEntry::Concrete { parameters, .. } => Ok(parameters.clone()),
            TypeEntry::Abstract { .. } => Err(ScriptbindError::Instantiation {
                type_name: type_name.to_string(),
                reason: "abstract types have no constructor".to_string(),
            }),
        }
    }

    fn construct(&self, type_name: &str, arguments: Arguments) -> Result<Instance> {
        match self.entry(type_name)? {
            TypeEntry::Concrete {
                parameters,
                constructor,
            } => {
                if parameters.len() != arguments.len() {
                    return Err(ScriptbindError::Instantiation {
                        type_name: type_name.to_string(),
                        reason: format!(
                            "expected {} arguments, got {}",
                            parameters.len(),
                            arguments.len()
                        ),
                    });
                }
                constructor(arguments)
            }
            TypeEntry::Abstract { .. } => Err(ScriptbindError::Instantiation {
                type_name: type_name.to_string(),
                reason: "abstract types cannot be constructed".to_string(),
            }),
        }
    }
}

impl NamespaceDiscovery for TypeCatalog {
    fn discover(&self, namespace: &str) -> Vec<(String, String)> {
        let prefix = format!("{}.", namespace.trim_end_matches('.'));
        let mut pairs: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|(name, _)| namespace.is_empty() || name.starts_with(&prefix))
            .filter_map(|(name, entry)| match entry {
                TypeEntry::Abstract {
                    default_impl: Some(default_impl),
                } => Some((name.clone(), default_impl.clone())),
                _ => None,
            })
            .collect();
        pairs.sort();
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::instance;

    #[derive(Debug)]
    struct Point(i64, i64);

    fn catalog() -> TypeCatalog {
        let mut catalog = TypeCatalog::new();
        catalog
            .declare_abstract_with_default("app.storage.Store", "app.storage.MemoryStore")
            .declare_abstract_with_default("app.mail.Mailer", "app.mail.NullMailer")
            .declare_abstract("other.Clock")
            .declare_concrete("Origin", vec![], |_| Ok(instance(Point(0, 0))));
        catalog
    }

    #[test]
    fn test_metadata() {
        let catalog = catalog();
        assert!(catalog.is_abstract("other.Clock"));
        assert!(!catalog.is_abstract("Origin"));
        assert!(!catalog.is_abstract("Missing"));
        assert!(catalog.constructor_parameters("Origin").unwrap().is_empty());
        assert!(matches!(
            catalog.constructor_parameters("Missing"),
            Err(ScriptbindError::UnknownType(_))
        ));
    }

    #[test]
    fn test_construct_checks_arity() {
        let catalog = catalog();
        let origin = catalog.construct("Origin", Arguments::default()).unwrap();
        assert_eq!(downcast::<Point>(&origin).unwrap().0, 0);

        let extra = Arguments::new(vec![instance(1u8)]);
        assert!(catalog.construct("Origin", extra).is_err());
    }

    #[test]
    fn test_discover_by_namespace() {
        let catalog = catalog();
        let found = catalog.discover("app.storage");
        assert_eq!(
            found,
            vec![(
                "app.storage.Store".to_string(),
                "app.storage.MemoryStore".to_string()
            )]
        );
        assert_eq!(catalog.discover("").len(), 2);
        assert!(catalog.discover("other").is_empty());
    }
}
