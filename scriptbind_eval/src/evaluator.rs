//! Dynamic evaluator
//!
//! Runs script text on a [`CodeHost`] and keeps the most recent
//! [`Fragment`] as the current one. Every evaluation also hands back its
//! own `Arc<Fragment>`, so callers that evaluate several scripts can keep
//! using each result independently of the current slot.

use crate::host::{host_from_config, CodeHost, Fragment};
use crate::interpreter::Interpreter;
use crate::value::Value;
use scriptbind_core::{Result, RuntimeConfig, ScriptbindError};
use std::sync::Arc;
use std::time::Duration;

/// Evaluates script text and tracks the current fragment
pub struct DynamicEvaluator {
    host: Arc<dyn CodeHost>,
    current: Option<Arc<Fragment>>,
    /// Applied by [`DynamicEvaluator::evaluate_bounded`]
    timeout: Option<Duration>,
}

impl DynamicEvaluator {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self {
            host,
            current: None,
            timeout: None,
        }
    }

    /// Build the evaluator described by `config`
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let mut evaluator = Self::new(host_from_config(config)?);
        evaluator.timeout = config.evaluation_timeout_ms.map(Duration::from_millis);
        Ok(evaluator)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn host(&self) -> &Arc<dyn CodeHost> {
        &self.host
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Compile and run `text`, making the result the current fragment
    ///
    /// Side effects of the script are not contained. On failure the current
    /// fragment is left unchanged.
    pub fn evaluate(&mut self, text: &str) -> Result<Arc<Fragment>> {
        tracing::debug!("Evaluating {} bytes on {} host", text.len(), self.host.name());
        let fragment = Arc::new(self.host.compile_and_run(text)?);
        self.set_current(&fragment);
        Ok(fragment)
    }

    /// Like [`evaluate`](Self::evaluate) but gives up after `limit`
    ///
    /// The evaluation runs on the blocking pool. A script that overruns the
    /// limit keeps its worker thread until the host returns, and its result
    /// is discarded. A [`ProcessHost`](crate::host::ProcessHost) built from
    /// the same configuration kills its child at the same deadline.
    pub async fn evaluate_with_timeout(
        &mut self,
        text: &str,
        limit: Duration,
    ) -> Result<Arc<Fragment>> {
        let host = Arc::clone(&self.host);
        let source = text.to_string();
        let task = tokio::task::spawn_blocking(move || host.compile_and_run(&source));

        let fragment = match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => Arc::new(result?),
            Ok(Err(join_error)) => {
                return Err(ScriptbindError::Evaluation(format!(
                    "evaluation task failed: {}",
                    join_error
                )))
            }
            Err(_) => {
                tracing::warn!("Evaluation exceeded {:?}", limit);
                return Err(ScriptbindError::EvaluationTimeout(limit.as_millis() as u64));
            }
        };

        self.set_current(&fragment);
        Ok(fragment)
    }

    /// Evaluate with the configured timeout, if any
    pub async fn evaluate_bounded(&mut self, text: &str) -> Result<Arc<Fragment>> {
        match self.timeout {
            Some(limit) => self.evaluate_with_timeout(text, limit).await,
            None => self.evaluate(text),
        }
    }

    fn set_current(&mut self, fragment: &Arc<Fragment>) {
        tracing::debug!("Current fragment defines {} symbol(s)", fragment.len());
        self.current = Some(Arc::clone(fragment));
    }

    /// The most recently evaluated fragment
    pub fn current(&self) -> Option<&Arc<Fragment>> {
        self.current.as_ref()
    }

    /// Look up `name` on the current fragment
    pub fn get_symbol(&self, name: &str) -> Result<Value> {
        let fragment = self
            .current
            .as_ref()
            .ok_or_else(|| ScriptbindError::SymbolNotFound(name.to_string()))?;
        fragment.symbol(name).cloned()
    }

    /// Call the function bound to `name` in `fragment`
    pub fn invoke(&self, fragment: &Fragment, name: &str, args: Vec<Value>) -> Result<Value> {
        match fragment.symbol(name)? {
            Value::Function(closure) => closure.call(args),
            other => Err(ScriptbindError::Evaluation(format!(
                "`{}` is {}, not a function",
                name,
                other.type_name()
            ))),
        }
    }
}

impl Default for DynamicEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(Interpreter::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DisabledHost;

    struct SlowHost(Duration);

    impl CodeHost for SlowHost {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn compile_and_run(&self, _source: &str) -> Result<Fragment> {
            std::thread::sleep(self.0);
            Ok(Fragment::new())
        }
    }

    #[test]
    fn test_get_symbol_before_evaluate() {
        let evaluator = DynamicEvaluator::default();
        assert!(matches!(
            evaluator.get_symbol("x"),
            Err(ScriptbindError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_evaluate_and_get_symbol() {
        let mut evaluator = DynamicEvaluator::default();
        evaluator.evaluate("val x = 40 + 2").unwrap();

        assert_eq!(evaluator.get_symbol("x").unwrap(), Value::Int(42));
        assert!(matches!(
            evaluator.get_symbol("y"),
            Err(ScriptbindError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_handles_outlive_current_slot() {
        let mut evaluator = DynamicEvaluator::default();
        let first = evaluator.evaluate("val x = 1").unwrap();
        let second = evaluator.evaluate("val x = 2").unwrap();

        assert_eq!(first.symbol("x").unwrap(), &Value::Int(1));
        assert_eq!(second.symbol("x").unwrap(), &Value::Int(2));
        assert_eq!(evaluator.get_symbol("x").unwrap(), Value::Int(2));
        assert!(Arc::ptr_eq(evaluator.current().unwrap(), &second));
    }

    #[test]
    fn test_failed_evaluation_keeps_current() {
        let mut evaluator = DynamicEvaluator::default();
        evaluator.evaluate("val x = 1").unwrap();
        assert!(evaluator.evaluate("val y = ").is_err());
        assert_eq!(evaluator.get_symbol("x").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_invoke() {
        let mut evaluator = DynamicEvaluator::default();
        let fragment = evaluator
            .evaluate("val double = { n: Int -> n * 2 }\nval label = \"x\"")
            .unwrap();

        assert_eq!(
            evaluator
                .invoke(&fragment, "double", vec![Value::Int(21)])
                .unwrap(),
            Value::Int(42)
        );
        assert!(evaluator.invoke(&fragment, "label", vec![]).is_err());
        assert!(evaluator.invoke(&fragment, "missing", vec![]).is_err());
    }

    #[test]
    fn test_disabled_backend() {
        let mut evaluator = DynamicEvaluator::new(Arc::new(DisabledHost));
        assert!(matches!(
            evaluator.evaluate("val x = 1"),
            Err(ScriptbindError::BackendDisabled)
        ));
    }

    #[tokio::test]
    async fn test_evaluate_with_timeout_expires() {
        let mut evaluator = DynamicEvaluator::new(Arc::new(SlowHost(Duration::from_millis(500))));
        let err = evaluator
            .evaluate_with_timeout("", Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptbindError::EvaluationTimeout(20)));
        assert!(evaluator.current().is_none());
    }

    #[tokio::test]
    async fn test_evaluate_bounded_within_limit() {
        let mut evaluator = DynamicEvaluator::default().with_timeout(Duration::from_secs(5));
        let fragment = evaluator.evaluate_bounded("val s = \"ok\"").await.unwrap();

        assert_eq!(fragment.symbol("s").unwrap(), &Value::from("ok"));
        assert_eq!(evaluator.get_symbol("s").unwrap(), Value::from("ok"));
    }

    #[test]
    fn test_from_config() {
        let config = RuntimeConfig {
            evaluation_timeout_ms: Some(250),
            ..RuntimeConfig::default()
        };
        let evaluator = DynamicEvaluator::from_config(&config).unwrap();
        assert_eq!(evaluator.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(evaluator.host().name(), "interpreter");
    }
}
