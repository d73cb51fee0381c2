//! Code hosts: the backends that compile and run script text
//!
//! A host turns source text into a [`Fragment`], an immutable snapshot of
//! the symbols the script defined. Hosts provide namespace isolation only;
//! side effects of the evaluated code are not contained.

use crate::interpreter::Interpreter;
use crate::value::Value;
use scriptbind_core::config::{BackendKind, ProcessConfig, RuntimeConfig};
use scriptbind_core::{Result, ScriptbindError};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// A backend able to evaluate script text
pub trait CodeHost: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Compile and execute `source`, returning the symbols it produced
    fn compile_and_run(&self, source: &str) -> Result<Fragment>;
}

/// A named value defined by a script
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub value: Value,
    /// Reflected type, e.g. `(String) -> Int`
    pub ty: String,
    /// Marked with the export annotation
    pub exported: bool,
}

/// Result of one evaluation
#[derive(Debug, Clone)]
pub struct Fragment {
    order: Vec<String>,
    symbols: HashMap<String, Symbol>,
    result: Value,
}

impl Fragment {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            symbols: HashMap::new(),
            result: Value::Null,
        }
    }

    /// Add or replace a symbol, keeping first-definition order
    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) {
        let name = name.into();
        if !self.symbols.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.symbols.insert(name, symbol);
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = value;
    }

    /// Value of the last statement
    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Value bound to `name`
    pub fn symbol(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .map(|s| &s.value)
            .ok_or_else(|| ScriptbindError::SymbolNotFound(name.to_string()))
    }

    /// Reflected type of `name`
    pub fn symbol_type(&self, name: &str) -> Result<&str> {
        self.get(name)
            .map(|s| s.ty.as_str())
            .ok_or_else(|| ScriptbindError::SymbolNotFound(name.to_string()))
    }

    /// Symbol names in definition order
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Exported symbol names in definition order
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .filter(|name| self.symbols.get(*name).is_some_and(|s| s.exported))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Fragment {
    fn default() -> Self {
        Self::new()
    }
}

/// Host for deployments where evaluation is switched off
#[derive(Debug, Default)]
pub struct DisabledHost;

impl CodeHost for DisabledHost {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn compile_and_run(&self, _source: &str) -> Result<Fragment> {
        Err(ScriptbindError::BackendDisabled)
    }
}

/// Evaluates scripts in an external process
///
/// The source is written to the child's stdin. The child must print a JSON
/// object on stdout mapping symbol names either to plain values or to
/// `{"value": ..., "type": "...", "exported": bool}`.
///
/// Stdin is fed and stdout/stderr are drained on their own threads, so a
/// child that writes while it reads cannot stall on a full pipe. With a
/// timeout set, a child that overruns it is killed and reaped.
#[derive(Debug, Clone)]
pub struct ProcessHost {
    command: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessHost {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the child if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &ProcessConfig) -> Self {
        Self::new(config.command.clone()).with_args(config.args.iter().cloned())
    }

    /// Wait for the child, killing it once the timeout passes
    ///
    /// Returns `None` when the child was killed. The child is reaped on
    /// every path.
    fn wait(&self, child: &mut Child) -> Result<Option<ExitStatus>> {
        let Some(limit) = self.timeout else {
            return Ok(Some(child.wait()?));
        };

        match child.wait_timeout(limit) {
            Ok(Some(status)) => Ok(Some(status)),
            Ok(None) => {
                tracing::warn!("Evaluator {} exceeded {:?}, killing", self.command, limit);
                // the child may exit between the timeout and the kill
                let _ = child.kill();
                child.wait()?;
                Ok(None)
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err.into())
            }
        }
    }

    fn parse_output(stdout: &[u8]) -> Result<Fragment> {
        let parsed: serde_json::Value = serde_json::from_slice(stdout)?;
        let serde_json::Value::Object(entries) = parsed else {
            return Err(ScriptbindError::Evaluation(
                "evaluator output must be a JSON object".to_string(),
            ));
        };

        let mut fragment = Fragment::new();
        for (name, entry) in entries {
            let symbol = match entry {
                serde_json::Value::Object(mut fields) if fields.contains_key("value") => {
                    let value = Value::from(fields.remove("value").unwrap_or_default());
                    let ty = match fields.remove("type") {
                        Some(serde_json::Value::String(ty)) => ty,
                        _ => value.type_name(),
                    };
                    let exported = fields
                        .get("exported")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    Symbol {
                        value,
                        ty,
                        exported,
                    }
                }
                other => {
                    let value = Value::from(other);
                    Symbol {
                        ty: value.type_name(),
                        value,
                        exported: false,
                    }
                }
            };
            fragment.insert(name, symbol);
        }
        Ok(fragment)
    }
}

impl CodeHost for ProcessHost {
    fn name(&self) -> &'static str {
        "process"
    }

    fn compile_and_run(&self, source: &str) -> Result<Fragment> {
        tracing::debug!("Spawning evaluator: {} {:?}", self.command, self.args);
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let input = source.as_bytes().to_vec();
        let writer = thread::spawn(move || match stdin {
            Some(mut pipe) => pipe.write_all(&input),
            None => Ok(()),
        });
        let stdout = child.stdout.take();
        let stdout_reader = thread::spawn(move || read_pipe(stdout));
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || read_pipe(stderr));

        let status = self.wait(&mut child)?;
        let stdout = join_pipe(stdout_reader)??;
        let stderr = join_pipe(stderr_reader)??;
        match join_pipe(writer)? {
            // the child is free to exit without reading all of its input
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!("Evaluator closed stdin early");
            }
            Err(err) => return Err(err.into()),
            Ok(()) => {}
        }

        let Some(status) = status else {
            let limit = self.timeout.unwrap_or_default();
            return Err(ScriptbindError::EvaluationTimeout(limit.as_millis() as u64));
        };
        if !status.success() {
            return Err(ScriptbindError::Evaluation(format!(
                "evaluator exited with {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        Self::parse_output(&stdout)
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer)?;
    }
    Ok(buffer)
}

fn join_pipe<T>(handle: thread::JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| ScriptbindError::Evaluation("evaluator pipe thread panicked".to_string()))
}

/// Build the host selected by configuration
pub fn host_from_config(config: &RuntimeConfig) -> Result<Arc<dyn CodeHost>> {
    let host: Arc<dyn CodeHost> = match config.backend {
        BackendKind::Interpreter => {
            Arc::new(Interpreter::with_export_marker(&config.export_marker))
        }
        BackendKind::Disabled => Arc::new(DisabledHost),
        BackendKind::Process => {
            let process = config.process.as_ref().ok_or_else(|| ScriptbindError::ConfigError {
                path: "process".to_string(),
                message: "Process backend requires a process section".to_string(),
            })?;
            let host = ProcessHost::from_config(process);
            match config.evaluation_timeout_ms {
                Some(ms) => Arc::new(host.with_timeout(Duration::from_millis(ms))),
                None => Arc::new(host),
            }
        }
    };
    tracing::info!("Using {} code host", host.name());
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_lookup() {
        let mut fragment = Fragment::new();
        fragment.insert(
            "x",
            Symbol {
                value: Value::Int(1),
                ty: "Int".into(),
                exported: false,
            },
        );
        fragment.insert(
            "run",
            Symbol {
                value: Value::Null,
                ty: "() -> Unit".into(),
                exported: true,
            },
        );
        fragment.insert(
            "x",
            Symbol {
                value: Value::Int(2),
                ty: "Int".into(),
                exported: false,
            },
        );

        assert_eq!(fragment.symbol("x").unwrap(), &Value::Int(2));
        assert_eq!(fragment.symbol_type("run").unwrap(), "() -> Unit");
        assert_eq!(fragment.symbol_names().collect::<Vec<_>>(), vec!["x", "run"]);
        assert_eq!(fragment.exports().collect::<Vec<_>>(), vec!["run"]);
        assert!(matches!(
            fragment.symbol("y"),
            Err(ScriptbindError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_disabled_host() {
        assert!(matches!(
            DisabledHost.compile_and_run("val x = 1"),
            Err(ScriptbindError::BackendDisabled)
        ));
    }

    #[test]
    fn test_parse_process_output() {
        let out = br#"{
            "count": 3,
            "run": {"value": null, "type": "(String) -> Unit", "exported": true}
        }"#;
        let fragment = ProcessHost::parse_output(out).unwrap();

        assert_eq!(fragment.symbol("count").unwrap(), &Value::Int(3));
        assert_eq!(fragment.symbol_type("count").unwrap(), "Int");
        assert_eq!(fragment.symbol_type("run").unwrap(), "(String) -> Unit");
        assert_eq!(fragment.exports().collect::<Vec<_>>(), vec!["run"]);

        assert!(ProcessHost::parse_output(b"[1, 2]").is_err());
        assert!(ProcessHost::parse_output(b"not json").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_round_trip() {
        let host = ProcessHost::new("cat");
        let fragment = host.compile_and_run(r#"{"greeting": "hi"}"#).unwrap();
        assert_eq!(fragment.symbol("greeting").unwrap(), &Value::from("hi"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_failure() {
        let host = ProcessHost::new("sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let err = host.compile_and_run("").unwrap_err();
        assert!(err.to_string().contains("broken"), "{}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_large_input_does_not_stall() {
        let payload = "x".repeat(1 << 20);
        let source = format!(r#"{{"data": "{}"}}"#, payload);

        let fragment = ProcessHost::new("cat").compile_and_run(&source).unwrap();
        assert_eq!(fragment.symbol("data").unwrap().as_str().map(str::len), Some(1 << 20));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_child_ignoring_stdin() {
        let source = "x".repeat(1 << 20);

        let host = ProcessHost::new("sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let err = host.compile_and_run(&source).unwrap_err();
        assert!(err.to_string().contains("broken"), "{}", err);

        let host = ProcessHost::new("sh").with_args(["-c", "echo '{\"n\": 1}'"]);
        let fragment = host.compile_and_run(&source).unwrap();
        assert_eq!(fragment.symbol("n").unwrap(), &Value::Int(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_kills_on_timeout() {
        let host = ProcessHost::new("sleep")
            .with_args(["5"])
            .with_timeout(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = host.compile_and_run("").unwrap_err();
        assert!(matches!(err, ScriptbindError::EvaluationTimeout(100)), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_host_from_config() {
        let mut config = RuntimeConfig::default();
        assert_eq!(host_from_config(&config).unwrap().name(), "interpreter");

        config.backend = BackendKind::Disabled;
        assert_eq!(host_from_config(&config).unwrap().name(), "disabled");

        config.backend = BackendKind::Process;
        assert!(host_from_config(&config).is_err());
    }
}
