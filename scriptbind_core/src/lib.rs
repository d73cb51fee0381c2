//! Scriptbind Core
//!
//! Runtime dependency registry and signature contracts for scriptbind.
//! This crate provides tagged bindings, constructor-driven resolution over
//! injected type metadata, and extraction and matching of function-shaped
//! contracts declared in script text.

pub mod config;
pub mod error;
pub mod introspect;
pub mod matcher;
pub mod registry;
pub mod resolver;
pub mod signature;
pub mod types;

pub use config::{ConfigLoader, RuntimeConfig};
pub use error::{Result, ScriptbindError};
pub use introspect::{Arguments, NamespaceDiscovery, TypeCatalog, TypeIntrospector};
pub use matcher::{normalize_signature, signatures_match, MismatchPolicy, SignatureMatcher};
pub use registry::{Registry, Scope};
pub use resolver::Resolver;
pub use signature::{extract_signature, ScriptContract, Signature, SignatureExtractor};
pub use types::{instance, Instance, Parameter, Tag, TypeDescriptor};
