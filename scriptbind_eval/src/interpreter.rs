//! In-process interpreter for a small statically typed script language
//!
//! Scripts are sequences of `val`/`var` declarations, reassignments and
//! expression statements. Every declaration gets a reflected type: the
//! annotation when one is written, otherwise a type inferred statically.
//! Lambdas reflect as function types such as `(String, Int) -> Boolean`.

use crate::host::{CodeHost, Fragment, Symbol};
use crate::lexer::{syntax_error, tokenize};
use crate::parser::{parse, BinaryOp, Expr, Lambda, Stmt, UnaryOp};
use crate::value::Value;
use scriptbind_core::signature::DEFAULT_EXPORT_MARKER;
use scriptbind_core::{extract_signature, normalize_signature, Result, ScriptbindError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const ANY: &str = "Any";
const UNIT: &str = "Unit";

/// Functions available without declaration
const BUILTINS: [&str; 2] = ["println", "listOf"];

fn runtime_error(message: impl Into<String>) -> ScriptbindError {
    ScriptbindError::Evaluation(message.into())
}

/// Values and static types visible at some point of a script
#[derive(Debug, Clone, Default)]
struct Env {
    values: HashMap<String, Value>,
    types: HashMap<String, String>,
}

impl Env {
    fn bind(&mut self, name: &str, value: Value, ty: String) {
        self.values.insert(name.to_string(), value);
        self.types.insert(name.to_string(), ty);
    }
}

/// A lambda together with the environment it was created in
#[derive(Debug)]
pub struct Closure {
    lambda: Arc<Lambda>,
    param_types: Vec<String>,
    env: Env,
    ty: String,
}

impl Closure {
    /// Reflected function type, e.g. `(Int) -> Int`
    pub fn type_name(&self) -> &str {
        &self.ty
    }

    pub fn arity(&self) -> usize {
        self.lambda.params.len()
    }

    /// Invoke the closure
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        if args.len() != self.arity() {
            return Err(runtime_error(format!(
                "function {} expects {} argument(s), got {}",
                self.ty,
                self.arity(),
                args.len()
            )));
        }

        let mut env = self.env.clone();
        for ((param, ty), arg) in self.lambda.params.iter().zip(&self.param_types).zip(args) {
            env.bind(&param.name, arg, ty.clone());
        }
        eval(&self.lambda.body, &env)
    }
}

/// The in-process code host
#[derive(Debug, Clone)]
pub struct Interpreter {
    /// Annotation name marking exports, without the leading `@`
    export_annotation: String,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_export_marker(DEFAULT_EXPORT_MARKER)
    }

    /// Use a custom `@Annotation` as the export marker
    pub fn with_export_marker(marker: &str) -> Self {
        Self {
            export_annotation: marker.trim().trim_start_matches('@').to_string(),
        }
    }

    /// Parse and execute `source`
    pub fn run(&self, source: &str) -> Result<Fragment> {
        let statements = parse(source, tokenize(source)?)?;
        let mut env = Env::default();
        let mut mutable = HashSet::new();
        let mut fragment = Fragment::new();

        for statement in &statements {
            match statement {
                Stmt::Decl {
                    name,
                    mutable: is_var,
                    annotations,
                    ty,
                    value,
                    offset,
                } => {
                    let at = |e: ScriptbindError| located(source, *offset, name, e);
                    if env.types.contains_key(name) {
                        return Err(at(runtime_error("already declared")));
                    }

                    let inferred = infer(value, &env.types, ty.as_deref());
                    if let Some(declared) = ty {
                        if !assignable(declared, &inferred) {
                            return Err(at(runtime_error(format!(
                                "declared {} but the value is {}",
                                declared, inferred
                            ))));
                        }
                    }
                    let symbol_ty = ty.clone().unwrap_or(inferred);

                    let result = match value {
                        Expr::Lambda(lambda) => {
                            Ok(make_closure(lambda, &env, Some(symbol_ty.as_str())))
                        }
                        other => eval(other, &env),
                    };
                    let result = result.map_err(at)?;

                    let exported = annotations.iter().any(|a| *a == self.export_annotation);
                    tracing::debug!("Declared {}: {}", name, symbol_ty);
                    env.bind(name, result.clone(), symbol_ty.clone());
                    if *is_var {
                        mutable.insert(name.clone());
                    }
                    fragment.insert(
                        name.as_str(),
                        Symbol {
                            value: result.clone(),
                            ty: symbol_ty,
                            exported,
                        },
                    );
                    fragment.set_result(result);
                }
                Stmt::Assign {
                    name,
                    value,
                    offset,
                } => {
                    let at = |e: ScriptbindError| located(source, *offset, name, e);
                    let Some(declared) = env.types.get(name).cloned() else {
                        return Err(at(runtime_error("not declared")));
                    };
                    if !mutable.contains(name) {
                        return Err(at(runtime_error("`val` cannot be reassigned")));
                    }
                    let inferred = infer(value, &env.types, Some(&declared));
                    if !assignable(&declared, &inferred) {
                        return Err(at(runtime_error(format!(
                            "cannot assign {} to {}",
                            inferred, declared
                        ))));
                    }

                    let result = eval(value, &env).map_err(at)?;
                    env.bind(name, result.clone(), declared.clone());
                    let exported = fragment.get(name).is_some_and(|s| s.exported);
                    fragment.insert(
                        name.as_str(),
                        Symbol {
                            value: result.clone(),
                            ty: declared,
                            exported,
                        },
                    );
                    fragment.set_result(result);
                }
                Stmt::Expr(expr) => {
                    fragment.set_result(eval(expr, &env)?);
                }
            }
        }

        Ok(fragment)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeHost for Interpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile_and_run(&self, source: &str) -> Result<Fragment> {
        self.run(source)
    }
}

/// Prefix an evaluation error with its source position and symbol
fn located(source: &str, offset: usize, name: &str, err: ScriptbindError) -> ScriptbindError {
    match err {
        ScriptbindError::Evaluation(message) if !message.contains(':') => {
            syntax_error(source, offset, format!("`{}` {}", name, message))
        }
        other => other,
    }
}

fn make_closure(lambda: &Arc<Lambda>, env: &Env, expected: Option<&str>) -> Value {
    let expected = expected.and_then(extract_signature);
    let param_types =
        lambda_param_types(lambda, expected.as_ref().map(|s| s.params.as_slice()));
    let ty = lambda_type(
        lambda,
        &param_types,
        &env.types,
        expected.as_ref().map(|s| s.return_type.as_str()),
    );
    Value::Function(Arc::new(Closure {
        lambda: Arc::clone(lambda),
        param_types,
        env: env.clone(),
        ty,
    }))
}

// ---------------------------------------------------------------------------
// Static types
// ---------------------------------------------------------------------------

fn lambda_param_types(lambda: &Lambda, expected: Option<&[String]>) -> Vec<String> {
    let expected = expected.filter(|params| params.len() == lambda.params.len());
    lambda
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            param
                .ty
                .clone()
                .or_else(|| expected.map(|params| params[i].clone()))
                .unwrap_or_else(|| ANY.to_string())
        })
        .collect()
}

fn lambda_type(
    lambda: &Lambda,
    param_types: &[String],
    types: &HashMap<String, String>,
    expected_return: Option<&str>,
) -> String {
    let mut scope = types.clone();
    for (param, ty) in lambda.params.iter().zip(param_types) {
        scope.insert(param.name.clone(), ty.clone());
    }
    let ret = match expected_return {
        // any body is accepted where Unit is expected
        Some(UNIT) => UNIT.to_string(),
        _ => infer(&lambda.body, &scope, None),
    };
    format!("({}) -> {}", param_types.join(", "), ret)
}

/// Infer the static type of `expr`
///
/// `expected` lets untyped lambda parameters pick up their types from an
/// annotation. Unknown types come out as `Any`.
fn infer(expr: &Expr, types: &HashMap<String, String>, expected: Option<&str>) -> String {
    match expr {
        Expr::Literal(value) => value.type_name(),
        Expr::Ident(name) => types.get(name).cloned().unwrap_or_else(|| ANY.to_string()),
        Expr::Unary(UnaryOp::Not, _) => "Boolean".to_string(),
        Expr::Unary(UnaryOp::Neg, operand) => infer(operand, types, None),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = infer(lhs, types, None);
            let rhs = infer(rhs, types, None);
            match op {
                BinaryOp::Add if lhs == "String" || rhs == "String" => "String".to_string(),
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                    numeric_type(&lhs, &rhs)
                }
                _ => "Boolean".to_string(),
            }
        }
        Expr::Call(callee, args) => {
            if let Expr::Ident(name) = callee.as_ref() {
                if !types.contains_key(name) {
                    match name.as_str() {
                        "println" => return UNIT.to_string(),
                        "listOf" => return list_type(args, types),
                        _ => {}
                    }
                }
            }
            extract_signature(&infer(callee, types, None))
                .map(|sig| sig.return_type)
                .unwrap_or_else(|| ANY.to_string())
        }
        Expr::Member(target, member) => {
            match (infer(target, types, None).as_str(), member.as_str()) {
                ("String", "length") => "Int".to_string(),
                (ty, "size") if ty.starts_with("List") => "Int".to_string(),
                _ => ANY.to_string(),
            }
        }
        Expr::Lambda(lambda) => {
            let expected = expected.and_then(extract_signature);
            let param_types =
                lambda_param_types(lambda, expected.as_ref().map(|s| s.params.as_slice()));
            lambda_type(
                lambda,
                &param_types,
                types,
                expected.as_ref().map(|s| s.return_type.as_str()),
            )
        }
    }
}

fn numeric_type(lhs: &str, rhs: &str) -> String {
    match (lhs, rhs) {
        ("Int", "Int") => "Int".to_string(),
        ("Int" | "Double", "Int" | "Double") => "Double".to_string(),
        _ => ANY.to_string(),
    }
}

fn list_type(items: &[Expr], types: &HashMap<String, String>) -> String {
    let mut item_types = items.iter().map(|item| infer(item, types, None));
    let element = match item_types.next() {
        Some(first) if item_types.all(|t| t == first) => first,
        _ => ANY.to_string(),
    };
    format!("List<{}>", element)
}

/// Whether a value of type `actual` may be stored where `declared` is expected
fn assignable(declared: &str, actual: &str) -> bool {
    let declared = normalize_signature(declared);
    let actual = normalize_signature(actual);

    if declared == actual || actual == ANY || declared == ANY || declared == "Any?" {
        return true;
    }

    if let Some(base) = declared.strip_suffix('?') {
        return actual == "Nothing?" || assignable(base, actual.trim_end_matches('?'));
    }

    match (extract_signature(&declared), extract_signature(&actual)) {
        (Some(d), Some(a)) => {
            d.params.len() == a.params.len()
                && d.params.iter().zip(&a.params).all(|(dp, ap)| assignable(ap, dp))
                && (d.return_type == UNIT || assignable(&d.return_type, &a.return_type))
        }
        _ => {
            // `List<Any>` from an empty or mixed literal fits any list
            declared.starts_with("List<") && actual == "List<Any>"
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, env: &Env) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => env.values.get(name).cloned().ok_or_else(|| {
            if BUILTINS.contains(&name.as_str()) {
                runtime_error(format!("builtin `{}` can only be called", name))
            } else {
                runtime_error(format!("unknown identifier `{}`", name))
            }
        }),
        Expr::Unary(op, operand) => {
            let value = eval(operand, env)?;
            match (op, value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| runtime_error("integer overflow")),
                (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (op, value) => Err(runtime_error(format!(
                    "cannot apply {:?} to {}",
                    op,
                    value.type_name()
                ))),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            Ok(Value::Bool(eval_bool(lhs, env)? && eval_bool(rhs, env)?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            Ok(Value::Bool(eval_bool(lhs, env)? || eval_bool(rhs, env)?))
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, env)?, eval(rhs, env)?),
        Expr::Call(callee, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>>>()?;

            if let Expr::Ident(name) = callee.as_ref() {
                if !env.values.contains_key(name) && BUILTINS.contains(&name.as_str()) {
                    return builtin(name, args);
                }
            }

            match eval(callee, env)? {
                Value::Function(closure) => closure.call(args),
                other => Err(runtime_error(format!(
                    "{} is not callable",
                    other.type_name()
                ))),
            }
        }
        Expr::Member(target, member) => match (eval(target, env)?, member.as_str()) {
            (Value::String(s), "length") => Ok(Value::Int(s.chars().count() as i64)),
            (Value::Array(items), "size") => Ok(Value::Int(items.len() as i64)),
            (Value::Object(mut fields), name) => fields
                .remove(name)
                .ok_or_else(|| runtime_error(format!("no member `{}`", name))),
            (value, name) => Err(runtime_error(format!(
                "{} has no member `{}`",
                value.type_name(),
                name
            ))),
        },
        Expr::Lambda(lambda) => Ok(make_closure(lambda, env, None)),
    }
}

fn eval_bool(expr: &Expr, env: &Env) -> Result<bool> {
    match eval(expr, env)? {
        Value::Bool(b) => Ok(b),
        other => Err(runtime_error(format!(
            "expected Boolean, got {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => return Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Add if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) => {
            return Ok(Value::String(format!("{}{}", lhs, rhs)));
        }
        _ => {}
    }

    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = lhs.as_float().unwrap_or_default();
            let b = rhs.as_float().unwrap_or_default();
            float_op(op, a, b)
        }
        (Value::String(a), Value::String(b)) => compare(op, a.cmp(b)),
        _ => Err(runtime_error(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
            return Err(runtime_error("Division by zero"));
        }
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        _ => return compare(op, a.cmp(&b)),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| runtime_error("integer overflow"))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(runtime_error("Division by zero"));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => {
            return a
                .partial_cmp(&b)
                .map_or(Ok(Value::Bool(false)), |ordering| compare(op, ordering));
        }
    };
    Ok(Value::Float(result))
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> Result<Value> {
    use std::cmp::Ordering::{Greater, Less};
    let result = match op {
        BinaryOp::Lt => ordering == Less,
        BinaryOp::Le => ordering != Greater,
        BinaryOp::Gt => ordering == Greater,
        BinaryOp::Ge => ordering != Less,
        other => {
            return Err(runtime_error(format!(
                "`{}` is not a comparison",
                other.symbol()
            )))
        }
    };
    Ok(Value::Bool(result))
}

fn builtin(name: &str, args: Vec<Value>) -> Result<Value> {
    match name {
        "println" => {
            let line: Vec<String> = args.iter().map(Value::to_string).collect();
            println!("{}", line.join(" "));
            Ok(Value::Null)
        }
        "listOf" => Ok(Value::Array(args)),
        other => Err(runtime_error(format!("unknown builtin `{}`", other))),
    }
}
