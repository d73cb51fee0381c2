//! Type definitions shared by the registry, resolver and matcher

use crate::error::{Result, ScriptbindError};
use crate::matcher::normalize_signature;
use crate::signature::split_top_level;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type-erased, shareable object produced by a factory or constructor
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an [`Instance`]
pub fn instance<T: Any + Send + Sync>(value: T) -> Instance {
    Arc::new(value)
}

/// Recover the concrete Rust type behind an [`Instance`]
pub fn downcast<T: Any + Send + Sync>(instance: &Instance) -> Result<Arc<T>> {
    instance
        .clone()
        .downcast::<T>()
        .map_err(|_| ScriptbindError::Downcast {
            expected: std::any::type_name::<T>().to_string(),
        })
}

/// Qualifier distinguishing several bindings of the same abstract type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    /// The sentinel used when no tag is given
    #[default]
    Undefined,
    Named(String),
}

impl Tag {
    pub fn named(name: impl Into<String>) -> Self {
        Tag::Named(name.into())
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        if s == "undefined" {
            Tag::Undefined
        } else {
            Tag::Named(s.to_string())
        }
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Tag::from(s.as_str())
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Undefined => f.write_str("undefined"),
            Tag::Named(name) => f.write_str(name),
        }
    }
}

/// Canonical description of a type name
///
/// Parsed from text such as `Map<String, List<Int>>?`. Function types like
/// `(String) -> Unit` are kept whole in `name` with no generic arguments.
/// Two descriptors are equal when their normalized renderings are equal,
/// so `core.String` and `String` compare equal while `String?` does not.
#[derive(Debug, Clone, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub generics: Vec<TypeDescriptor>,
    pub nullable: bool,
}

impl TypeDescriptor {
    /// A plain, non-nullable type with no generic arguments
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generics: Vec::new(),
            nullable: false,
        }
    }

    /// Parse a type from its textual form
    pub fn parse(text: &str) -> Self {
        let text = text.trim();

        if text.starts_with('(') {
            return Self::simple(text);
        }

        let (body, nullable) = match text.strip_suffix('?') {
            Some(body) => (body.trim_end(), true),
            None => (text, false),
        };

        if let (Some(open), true) = (body.find('<'), body.ends_with('>')) {
            let inner = &body[open + 1..body.len() - 1];
            return Self {
                name: body[..open].trim().to_string(),
                generics: split_top_level(inner).iter().map(|g| Self::parse(g)).collect(),
                nullable,
            };
        }

        Self {
            name: body.to_string(),
            generics: Vec::new(),
            nullable,
        }
    }

    /// Same type, marked nullable
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Normalized rendering used for comparison and hashing
    pub fn normalized(&self) -> String {
        normalize_signature(&self.to_string())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.generics.is_empty() {
            f.write_str("<")?;
            for (i, generic) in self.generics.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", generic)?;
            }
            f.write_str(">")?;
        }
        if self.nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl From<&str> for TypeDescriptor {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// A named constructor parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: impl Into<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}
