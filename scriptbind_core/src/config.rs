//! Runtime configuration loader

use crate::error::{Result, ScriptbindError};
use crate::matcher::{MismatchPolicy, DEFAULT_BUILTIN_PREFIXES};
use crate::resolver::DEFAULT_MAX_DEPTH;
use crate::signature::DEFAULT_EXPORT_MARKER;
use crate::types::Tag;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for the registry, matcher and evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Marker introducing exported declarations in scripts
    #[serde(default = "default_export_marker")]
    pub export_marker: String,

    /// Built-in namespace prefixes ignored when matching signatures
    #[serde(default = "default_builtin_prefixes")]
    pub builtin_prefixes: Vec<String>,

    #[serde(default)]
    pub mismatch_policy: MismatchPolicy,

    /// Deepest constructor chain the resolver will follow
    #[serde(default = "default_max_depth")]
    pub max_resolution_depth: usize,

    pub evaluation_timeout_ms: Option<u64>,

    #[serde(default)]
    pub backend: BackendKind,

    /// Subprocess backend settings
    pub process: Option<ProcessConfig>,

    /// Bindings resolved by default construction
    #[serde(default)]
    pub bindings: Vec<BindingDecl>,

    /// Namespaces scanned for abstract types with default implementations
    #[serde(default)]
    pub scan_namespaces: Vec<String>,
}

/// Which code host evaluates scripts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Interpreter,
    Process,
    Disabled,
}

/// External evaluator command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// A declarative `abstract -> concrete` binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingDecl {
    #[serde(rename = "abstract")]
    pub abstract_type: String,

    pub concrete: String,

    #[serde(default)]
    pub tag: Tag,
}

fn default_export_marker() -> String {
    DEFAULT_EXPORT_MARKER.to_string()
}

fn default_builtin_prefixes() -> Vec<String> {
    DEFAULT_BUILTIN_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            export_marker: default_export_marker(),
            builtin_prefixes: default_builtin_prefixes(),
            mismatch_policy: MismatchPolicy::default(),
            max_resolution_depth: default_max_depth(),
            evaluation_timeout_ms: None,
            backend: BackendKind::default(),
            process: None,
            bindings: Vec::new(),
            scan_namespaces: Vec::new(),
        }
    }
}

/// Loads [`RuntimeConfig`] files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a YAML file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<RuntimeConfig> {
        let content = std::fs::read_to_string(path)?;
        self.load_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_string(&self, content: &str) -> Result<RuntimeConfig> {
        let config: RuntimeConfig = serde_yaml::from_str(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    fn validate(&self, config: &RuntimeConfig) -> Result<()> {
        if config.export_marker.trim().is_empty() {
            return Err(ScriptbindError::ConfigError {
                path: "export_marker".to_string(),
                message: "Export marker must not be empty".to_string(),
            });
        }

        if config.max_resolution_depth == 0 {
            return Err(ScriptbindError::ConfigError {
                path: "max_resolution_depth".to_string(),
                message: "Depth must be at least 1".to_string(),
            });
        }

        if config.backend == BackendKind::Process {
            let command = config.process.as_ref().map(|p| p.command.trim());
            if command.map_or(true, str::is_empty) {
                return Err(ScriptbindError::ConfigError {
                    path: "process.command".to_string(),
                    message: "Process backend requires a command".to_string(),
                });
            }
        }

        for (i, decl) in config.bindings.iter().enumerate() {
            if decl.abstract_type.trim().is_empty() || decl.concrete.trim().is_empty() {
                return Err(ScriptbindError::ConfigError {
                    path: format!("bindings[{}]", i),
                    message: "Binding needs both `abstract` and `concrete`".to_string(),
                });
            }
        }

        if config.evaluation_timeout_ms == Some(0) {
            tracing::warn!("evaluation_timeout_ms is 0, every evaluation will time out");
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
export_marker: "@Script"
builtin_prefixes: ["core."]
mismatch_policy: enforce
max_resolution_depth: 8
evaluation_timeout_ms: 250

backend: process
process:
  command: evaluator
  args: ["--json"]

bindings:
  - abstract: app.Store
    concrete: app.MemoryStore
  - abstract: app.Store
    concrete: app.DiskStore
    tag: disk

scan_namespaces:
  - app.mail
"#;

        let config = ConfigLoader::new().load_string(yaml).unwrap();

        assert_eq!(config.export_marker, "@Script");
        assert_eq!(config.mismatch_policy, MismatchPolicy::Enforce);
        assert_eq!(config.max_resolution_depth, 8);
        assert_eq!(config.evaluation_timeout_ms, Some(250));
        assert_eq!(config.backend, BackendKind::Process);
        assert_eq!(config.process.unwrap().args, vec!["--json"]);
        assert_eq!(config.bindings[0].tag, Tag::Undefined);
        assert_eq!(config.bindings[1].tag, Tag::named("disk"));
        assert_eq!(config.scan_namespaces, vec!["app.mail"]);
    }

    #[test]
    fn test_defaults() {
        let config = ConfigLoader::new().load_string("{}").unwrap();

        assert_eq!(config.export_marker, DEFAULT_EXPORT_MARKER);
        assert_eq!(config.builtin_prefixes.len(), DEFAULT_BUILTIN_PREFIXES.len());
        assert_eq!(config.mismatch_policy, MismatchPolicy::Warn);
        assert_eq!(config.backend, BackendKind::Interpreter);
        assert_eq!(config.max_resolution_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_process_backend_requires_command() {
        let result = ConfigLoader::new().load_string("backend: process\n");
        assert!(matches!(result, Err(ScriptbindError::ConfigError { .. })));
    }

    #[test]
    fn test_invalid_binding() {
        let yaml = r#"
bindings:
  - abstract: ""
    concrete: app.MemoryStore
"#;
        assert!(ConfigLoader::new().load_string(yaml).is_err());
    }

    #[test]
    fn test_zero_depth_rejected() {
        assert!(ConfigLoader::new()
            .load_string("max_resolution_depth: 0")
            .is_err());
    }
}
