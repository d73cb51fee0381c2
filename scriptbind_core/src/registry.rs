//! Binding registry
//!
//! Holds `(type, tag)`-keyed factories, eagerly built singletons and
//! post-construction listeners. A registry is meant to be populated during
//! a setup phase and then only read. It performs no internal locking: share
//! it behind one external lock, or treat it as immutable once populated.

use crate::config::RuntimeConfig;
use crate::error::{Result, ScriptbindError};
use crate::introspect::{Arguments, NamespaceDiscovery, TypeCatalog, TypeIntrospector};
use crate::types::{downcast, Instance, Tag};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

static UNDEFINED: Tag = Tag::Undefined;

/// Produces an instance for a binding
pub type Factory = Arc<dyn Fn(&Scope<'_>) -> Result<Instance> + Send + Sync>;

/// Observer invoked with every instance resolved for a type
pub type Listener = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Key of a binding or singleton
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub type_name: String,
    pub tag: Tag,
}

impl BindingKey {
    pub fn new(type_name: impl Into<String>, tag: Tag) -> Self {
        Self {
            type_name: type_name.into(),
            tag,
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.tag)
    }
}

/// Resolution handle passed to factories
///
/// A thin wrapper around the registry that remembers the tag it was
/// created for.
#[derive(Clone, Copy)]
pub struct Scope<'r> {
    registry: &'r Registry,
    tag: &'r Tag,
}

impl<'r> Scope<'r> {
    /// Tag this scope was created with
    pub fn tag(&self) -> &Tag {
        self.tag
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Resolve an untagged binding
    pub fn get_instance(&self, type_name: &str) -> Result<Instance> {
        self.registry.get_instance(type_name)
    }

    /// Resolve a tagged binding
    pub fn create_instance_of(&self, type_name: &str, tag: &Tag) -> Result<Instance> {
        self.registry.create_instance_of(type_name, tag)
    }

    /// Resolve an untagged binding and downcast it
    pub fn resolve<T: Any + Send + Sync>(&self, type_name: &str) -> Result<Arc<T>> {
        self.registry.resolve(type_name)
    }
}

/// Registry of bindings, singletons and listeners
pub struct Registry {
    introspector: Arc<dyn TypeIntrospector>,
    bindings: HashMap<BindingKey, Factory>,
    singletons: HashMap<BindingKey, Instance>,
    listeners: HashMap<String, Listener>,
}

impl Registry {
    /// Create a registry backed by an empty [`TypeCatalog`]
    pub fn new() -> Self {
        Self::with_introspector(Arc::new(TypeCatalog::new()))
    }

    /// Create a registry that default-constructs through `introspector`
    pub fn with_introspector(introspector: Arc<dyn TypeIntrospector>) -> Self {
        Self {
            introspector,
            bindings: HashMap::new(),
            singletons: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    pub fn introspector(&self) -> &Arc<dyn TypeIntrospector> {
        &self.introspector
    }

    /// Bind `type_name` to a factory under the undefined tag
    pub fn bind<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Scope<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        self.bind_tagged(type_name, Tag::Undefined, factory)
    }

    /// Bind `type_name` to a factory under `tag`; an existing binding is replaced
    pub fn bind_tagged<F>(
        &mut self,
        type_name: impl Into<String>,
        tag: Tag,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(&Scope<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        self.insert_binding(BindingKey::new(type_name, tag), Arc::new(factory));
        self
    }

    /// Bind `type_name` to the default constructor of `concrete`
    ///
    /// Whether `concrete` can be built without arguments is only checked
    /// when the binding is resolved.
    pub fn bind_concrete(
        &mut self,
        type_name: impl Into<String>,
        concrete: impl Into<String>,
    ) -> &mut Self {
        self.bind_concrete_tagged(type_name, concrete, Tag::Undefined)
    }

    pub fn bind_concrete_tagged(
        &mut self,
        type_name: impl Into<String>,
        concrete: impl Into<String>,
        tag: Tag,
    ) -> &mut Self {
        let factory = self.default_constructor(concrete.into());
        self.insert_binding(BindingKey::new(type_name, tag), factory);
        self
    }

    fn insert_binding(&mut self, key: BindingKey, factory: Factory) {
        if self.bindings.insert(key.clone(), factory).is_some() {
            tracing::warn!("Rebinding {}, previous factory replaced", key);
        } else {
            tracing::debug!("Bound {}", key);
        }
    }

    fn default_constructor(&self, concrete: String) -> Factory {
        let introspector = Arc::clone(&self.introspector);
        Arc::new(move |_: &Scope<'_>| {
            default_construct(introspector.as_ref(), &concrete)
        })
    }

    /// Build a singleton right away and store it under the undefined tag
    pub fn singleton<F>(&mut self, type_name: impl Into<String>, factory: F) -> Result<&mut Self>
    where
        F: FnOnce(&Scope<'_>) -> Result<Instance>,
    {
        self.singleton_tagged(type_name, Tag::Undefined, factory)
    }

    /// Build a singleton right away and store it under `tag`
    ///
    /// The factory runs exactly once, here. A stored singleton is never
    /// replaced; registering the same key again is an error.
    pub fn singleton_tagged<F>(
        &mut self,
        type_name: impl Into<String>,
        tag: Tag,
        factory: F,
    ) -> Result<&mut Self>
    where
        F: FnOnce(&Scope<'_>) -> Result<Instance>,
    {
        let key = BindingKey::new(type_name, tag);
        if self.singletons.contains_key(&key) {
            return Err(ScriptbindError::Instantiation {
                type_name: key.type_name,
                reason: "singleton already constructed".to_string(),
            });
        }

        let instance = factory(&self.create(&key.tag))?;
        tracing::debug!("Constructed singleton {}", key);
        self.singletons.insert(key, instance);
        Ok(self)
    }

    /// Default-construct `concrete` once and store it as the singleton for `type_name`
    pub fn singleton_concrete(
        &mut self,
        type_name: impl Into<String>,
        concrete: &str,
    ) -> Result<&mut Self> {
        let introspector = Arc::clone(&self.introspector);
        self.singleton(type_name, |_| default_construct(introspector.as_ref(), concrete))
    }

    /// Scope resolving against this registry, remembering `tag`
    pub fn create<'r>(&'r self, tag: &'r Tag) -> Scope<'r> {
        Scope {
            registry: self,
            tag,
        }
    }

    /// Scope for the undefined tag
    pub fn get(&self) -> Scope<'_> {
        self.create(&UNDEFINED)
    }

    /// Resolve `type_name` under the undefined tag
    pub fn get_instance(&self, type_name: &str) -> Result<Instance> {
        self.create_instance_of(type_name, &Tag::Undefined)
    }

    /// Resolve `type_name` under `tag`
    ///
    /// Singletons are consulted before bindings. The listener registered
    /// for `type_name`, if any, sees the produced instance.
    pub fn create_instance_of(&self, type_name: &str, tag: &Tag) -> Result<Instance> {
        let key = BindingKey::new(type_name, tag.clone());

        let instance = if let Some(instance) = self.singletons.get(&key) {
            Arc::clone(instance)
        } else if let Some(factory) = self.bindings.get(&key) {
            tracing::debug!("Resolving {}", key);
            factory(&self.create(tag))?
        } else {
            return Err(ScriptbindError::UnboundType {
                type_name: type_name.to_string(),
                tag: tag.to_string(),
            });
        };

        if let Some(listener) = self.listeners.get(type_name) {
            listener(&instance);
        }
        Ok(instance)
    }

    /// Resolve `type_name` under the undefined tag and downcast it
    pub fn resolve<T: Any + Send + Sync>(&self, type_name: &str) -> Result<Arc<T>> {
        downcast(&self.get_instance(type_name)?)
    }

    /// Observe every instance resolved for `type_name`
    pub fn listen_for<F>(&mut self, type_name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&Instance) + Send + Sync + 'static,
    {
        self.listeners.insert(type_name.into(), Arc::new(callback));
        self
    }

    /// Whether a binding or singleton exists for the exact key
    pub fn contains(&self, type_name: &str, tag: &Tag) -> bool {
        let key = BindingKey::new(type_name, tag.clone());
        self.singletons.contains_key(&key) || self.bindings.contains_key(&key)
    }

    /// Remove a binding; returns whether one existed
    pub fn unbind(&mut self, type_name: &str, tag: &Tag) -> bool {
        self.bindings
            .remove(&BindingKey::new(type_name, tag.clone()))
            .is_some()
    }

    pub fn bindings(&self) -> &HashMap<BindingKey, Factory> {
        &self.bindings
    }

    pub fn singletons(&self) -> &HashMap<BindingKey, Instance> {
        &self.singletons
    }

    pub fn listeners(&self) -> &HashMap<String, Listener> {
        &self.listeners
    }

    /// Bind every `(abstract, default implementation)` pair found under `namespace`
    ///
    /// Returns the number of bindings added.
    pub fn load_abstract_classes_from_scope(
        &mut self,
        discovery: &dyn NamespaceDiscovery,
        namespace: &str,
    ) -> usize {
        let pairs = discovery.discover(namespace);
        for (abstract_type, concrete) in &pairs {
            self.bind_concrete(abstract_type.as_str(), concrete.as_str());
        }
        tracing::debug!("Loaded {} bindings from namespace {}", pairs.len(), namespace);
        pairs.len()
    }

    /// Apply declarative bindings and namespace scans from configuration
    pub fn apply_config(
        &mut self,
        config: &RuntimeConfig,
        discovery: &dyn NamespaceDiscovery,
    ) -> &mut Self {
        for decl in &config.bindings {
            self.bind_concrete_tagged(
                decl.abstract_type.as_str(),
                decl.concrete.as_str(),
                decl.tag.clone(),
            );
        }
        for namespace in &config.scan_namespaces {
            self.load_abstract_classes_from_scope(discovery, namespace);
        }
        self
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build `concrete` with no constructor arguments
fn default_construct(introspector: &dyn TypeIntrospector, concrete: &str) -> Result<Instance> {
    let parameters =
        introspector
            .constructor_parameters(concrete)
            .map_err(|e| ScriptbindError::Instantiation {
                type_name: concrete.to_string(),
                reason: e.to_string(),
            })?;

    if !parameters.is_empty() {
        return Err(ScriptbindError::Instantiation {
            type_name: concrete.to_string(),
            reason: format!(
                "constructor requires {} argument(s), default construction needs none",
                parameters.len()
            ),
        });
    }

    introspector.construct(concrete, Arguments::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{instance, Parameter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Greeter(String);

    fn catalog() -> Arc<TypeCatalog> {
        let mut catalog = TypeCatalog::new();
        catalog
            .declare_abstract_with_default("app.Greeter", "app.EnglishGreeter")
            .declare_concrete("app.EnglishGreeter", vec![], |_| {
                Ok(instance(Greeter("hello".to_string())))
            })
            .declare_concrete(
                "app.NeedsArgs",
                vec![Parameter::new("greeter", "app.Greeter")],
                |_| Ok(instance(())),
            );
        Arc::new(catalog)
    }

    #[test]
    fn test_tags_are_independent() {
        let mut registry = Registry::new();
        registry
            .bind_tagged("Greeter", Tag::named("en"), |_| {
                Ok(instance(Greeter("hello".into())))
            })
            .bind_tagged("Greeter", Tag::named("fr"), |_| {
                Ok(instance(Greeter("bonjour".into())))
            });

        let en = registry.create_instance_of("Greeter", &Tag::named("en")).unwrap();
        let fr = registry.create_instance_of("Greeter", &Tag::named("fr")).unwrap();

        assert_eq!(downcast::<Greeter>(&en).unwrap().0, "hello");
        assert_eq!(downcast::<Greeter>(&fr).unwrap().0, "bonjour");
        assert!(matches!(
            registry.get_instance("Greeter"),
            Err(ScriptbindError::UnboundType { .. })
        ));
    }

    #[test]
    fn test_rebinding_last_write_wins() {
        let mut registry = Registry::new();
        registry
            .bind("Greeter", |_| Ok(instance(Greeter("first".into()))))
            .bind("Greeter", |_| Ok(instance(Greeter("second".into()))));

        assert_eq!(registry.bindings().len(), 1);
        assert_eq!(registry.resolve::<Greeter>("Greeter").unwrap().0, "second");
    }

    #[test]
    fn test_singleton_built_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let counter = Arc::clone(&calls);
        registry
            .singleton("Greeter", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(instance(Greeter("once".into())))
            })
            .unwrap();

        let first = registry.get_instance("Greeter").unwrap();
        let second = registry.get_instance("Greeter").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry
            .singleton("Greeter", |_| Ok(instance(Greeter("again".into()))))
            .is_err());
    }

    #[test]
    fn test_listener_sees_every_resolution() {
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        let mut registry = Registry::new();
        registry
            .bind("Greeter", |_| Ok(instance(Greeter("hi".into()))))
            .listen_for("Greeter", move |instance| {
                assert!(downcast::<Greeter>(instance).is_ok());
                observed.fetch_add(1, Ordering::SeqCst);
            });

        registry.get_instance("Greeter").unwrap();
        registry.get_instance("Greeter").unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(registry.listeners().len(), 1);
    }

    #[test]
    fn test_factory_resolves_through_scope() {
        let mut registry = Registry::new();
        registry
            .bind("Name", |_| Ok(instance("world".to_string())))
            .bind_tagged("Greeter", Tag::named("custom"), |scope| {
                assert_eq!(scope.tag(), &Tag::named("custom"));
                let name = scope.resolve::<String>("Name")?;
                Ok(instance(Greeter(format!("hello {}", name))))
            });

        let greeter = registry
            .create_instance_of("Greeter", &Tag::named("custom"))
            .unwrap();
        assert_eq!(downcast::<Greeter>(&greeter).unwrap().0, "hello world");
    }

    #[test]
    fn test_bind_concrete_default_constructs() {
        let mut registry = Registry::with_introspector(catalog());
        registry
            .bind_concrete("app.Greeter", "app.EnglishGreeter")
            .bind_concrete("Broken", "app.NeedsArgs")
            .bind_concrete("Missing", "app.Nowhere");

        assert_eq!(registry.resolve::<Greeter>("app.Greeter").unwrap().0, "hello");
        assert!(matches!(
            registry.get_instance("Broken"),
            Err(ScriptbindError::Instantiation { .. })
        ));
        assert!(matches!(
            registry.get_instance("Missing"),
            Err(ScriptbindError::Instantiation { .. })
        ));
    }

    #[test]
    fn test_singleton_concrete() {
        let mut registry = Registry::with_introspector(catalog());
        registry
            .singleton_concrete("app.Greeter", "app.EnglishGreeter")
            .unwrap();
        assert!(registry.contains("app.Greeter", &Tag::Undefined));
        assert_eq!(registry.singletons().len(), 1);
        assert!(registry
            .singleton_concrete("Broken", "app.NeedsArgs")
            .is_err());
    }

    #[test]
    fn test_load_from_namespace() {
        let catalog = catalog();
        let mut registry = Registry::with_introspector(catalog.clone());

        let added = registry.load_abstract_classes_from_scope(catalog.as_ref(), "app");

        assert_eq!(added, 1);
        assert_eq!(registry.resolve::<Greeter>("app.Greeter").unwrap().0, "hello");
    }

    #[test]
    fn test_unbind() {
        let mut registry = Registry::new();
        registry.bind("Greeter", |_| Ok(instance(Greeter("hi".into()))));
        assert!(registry.unbind("Greeter", &Tag::Undefined));
        assert!(!registry.unbind("Greeter", &Tag::Undefined));
        assert!(!registry.contains("Greeter", &Tag::Undefined));
    }
}
