use crate::ast::{Expr, Statement};
use crate::sketch::ContextHandle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Bound on nested calls, statements and expressions together. Recursion in a sketch fails with
/// [`RuntimeError::StackOverflow`] well before the host stack runs out.
pub const MAX_DEPTH: usize = 192;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    UndefinedVariable(String),
    TypeError { expected: String, got: String },
    NotCallable(String),
    UnknownMember { object: String, member: String },
    ReadOnly(String),
    InstanceRemoved,
    StackOverflow,
    Custom(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UndefinedVariable(name) => write!(f, "{} is not defined", name),
            RuntimeError::TypeError { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            RuntimeError::NotCallable(what) => write!(f, "{} is not a function", what),
            RuntimeError::UnknownMember { object, member } => {
                write!(f, "{} has no member '{}'", object, member)
            }
            RuntimeError::ReadOnly(name) => write!(f, "'{}' is read-only", name),
            RuntimeError::InstanceRemoved => write!(f, "sketch instance has been removed"),
            RuntimeError::StackOverflow => write!(f, "maximum call stack size exceeded"),
            RuntimeError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<Vec<Statement>>,
    env: Env,
}

/// A value of the sketch language.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Function(Rc<Closure>),
    Context(ContextHandle),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            Value::Context(_) => "object",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Function(_) | Value::Context(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Function(_) | Value::Context(_) => f64::NAN,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Context(a), Value::Context(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_) | Value::Str(_) | Value::Bool(_), Value::Number(_) | Value::Bool(_))
            | (Value::Number(_) | Value::Bool(_), Value::Str(_)) => {
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Function(c) => write!(f, "function {}() {{ ... }}", c.name.as_deref().unwrap_or("")),
            Value::Context(_) => write!(f, "[object Context]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

type Env = Rc<RefCell<Scope>>;

/// One function activation. Blocks do not open scopes, as with `var`.
#[derive(Default)]
struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

fn lookup(env: &Env, name: &str) -> Option<Value> {
    let scope = env.borrow();
    match scope.vars.get(name) {
        Some(value) => Some(value.clone()),
        None => scope.parent.as_ref().and_then(|p| lookup(p, name)),
    }
}

fn assign_existing(env: &Env, name: &str, value: Value) -> Result<(), Value> {
    let mut scope = env.borrow_mut();
    if let Some(slot) = scope.vars.get_mut(name) {
        *slot = value;
        return Ok(());
    }
    match scope.parent.clone() {
        Some(parent) => {
            drop(scope);
            assign_existing(&parent, name, value)
        }
        None => Err(value),
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Tree-walking evaluator for compiled sketch bodies.
pub struct Interpreter {
    globals: Env,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            globals: Rc::new(RefCell::new(Scope::default())),
            depth: 0,
        }
    }

    /// Wraps `body` as a function of `params` closed over the global scope.
    pub fn function(&self, params: &[String], body: Rc<Vec<Statement>>) -> Value {
        Value::Function(Rc::new(Closure {
            name: None,
            params: params.to_vec(),
            body,
            env: self.globals.clone(),
        }))
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().vars.get(name).cloned()
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, args),
            other => Err(RuntimeError::NotCallable(other.type_name().to_string())),
        }
    }

    /// Drops every global binding. Closures stored on a drawing context keep the global scope
    /// alive, so this breaks the reference cycle once the instance is torn down.
    pub fn clear(&mut self) {
        self.globals.borrow_mut().vars.clear();
    }

    /// Calls, statements and expressions share one nesting budget.
    fn nested<R>(
        &mut self,
        run: impl FnOnce(&mut Self) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        if self.depth >= MAX_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        self.depth += 1;
        let result = run(self);
        self.depth -= 1;
        result
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let scope = Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(closure.env.clone()),
        }));
        {
            let mut frame = scope.borrow_mut();
            let mut args = args.into_iter();
            for param in &closure.params {
                frame
                    .vars
                    .insert(param.clone(), args.next().unwrap_or(Value::Undefined));
            }
        }
        let body = closure.body.clone();
        match self.nested(|interp| interp.exec_block(&body, &scope))? {
            Flow::Return(value) => Ok(value),
            Flow::Normal | Flow::Break | Flow::Continue => Ok(Value::Undefined),
        }
    }

    fn exec_block(&mut self, body: &[Statement], env: &Env) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                jump => return Ok(jump),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Statement, env: &Env) -> Result<Flow, RuntimeError> {
        self.nested(|interp| interp.exec_inner(stmt, env))
    }

    fn exec_inner(&mut self, stmt: &Statement, env: &Env) -> Result<Flow, RuntimeError> {
        match stmt {
            Statement::Var { decls, .. } => {
                self.exec_var(decls, env)?;
                Ok(Flow::Normal)
            }
            Statement::Expr { expr, .. } => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Statement::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                if self.eval(condition, env)?.is_truthy() {
                    self.exec_block(then_body, env)
                } else {
                    self.exec_block(else_body, env)
                }
            }
            Statement::While {
                condition, body, ..
            } => self.exec_loop(None, Some(condition), None, body, env),
            Statement::For {
                init,
                condition,
                update,
                body,
                ..
            } => self.exec_loop(init.as_deref(), condition.as_ref(), update.as_ref(), body, env),
            Statement::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Statement::Break { .. } => Ok(Flow::Break),
            Statement::Continue { .. } => Ok(Flow::Continue),
            Statement::Block { body, .. } => self.exec_block(body, env),
            Statement::Empty { .. } => Ok(Flow::Normal),
        }
    }

    fn exec_var(&mut self, decls: &[(String, Option<Expr>)], env: &Env) -> Result<(), RuntimeError> {
        for (name, init) in decls {
            let value = match init {
                Some(expr) => Some(self.eval(expr, env)?),
                None => None,
            };
            let mut scope = env.borrow_mut();
            match value {
                Some(value) => {
                    scope.vars.insert(name.clone(), value);
                }
                None => {
                    scope.vars.entry(name.clone()).or_insert(Value::Undefined);
                }
            }
        }
        Ok(())
    }

    fn exec_loop(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Statement],
        env: &Env,
    ) -> Result<Flow, RuntimeError> {
        if let Some(init) = init {
            self.exec(init, env)?;
        }
        loop {
            if let Some(condition) = condition {
                if !self.eval(condition, env)?.is_truthy() {
                    break;
                }
            }
            match self.exec_block(body, env)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update, env)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value, RuntimeError> {
        self.nested(|interp| interp.eval_inner(expr, env))
    }

    fn eval_inner(&mut self, expr: &Expr, env: &Env) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Number { value, .. } => Ok(Value::Number(*value)),
            Expr::String { value, .. } => Ok(Value::Str(value.clone())),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Null { .. } => Ok(Value::Null),
            Expr::Undefined { .. } => Ok(Value::Undefined),
            Expr::Ident { name, .. } => {
                lookup(env, name).ok_or_else(|| RuntimeError::UndefinedVariable(name.clone()))
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, env)?;
                get_member(&object, property)
            }
            Expr::Call { callee, args, .. } => self.eval_call(callee, args, env),
            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand, env)?;
                Ok(match op.as_str() {
                    "-" => Value::Number(-value.to_number()),
                    "+" => Value::Number(value.to_number()),
                    _ => Value::Bool(!value.is_truthy()),
                })
            }
            Expr::Binary {
                op, left, right, ..
            } => self.eval_binary(op, left, right, env),
            Expr::Conditional {
                condition,
                then_value,
                else_value,
                ..
            } => {
                if self.eval(condition, env)?.is_truthy() {
                    self.eval(then_value, env)
                } else {
                    self.eval(else_value, env)
                }
            }
            Expr::Assign {
                op, target, value, ..
            } => self.eval_assign(op, target, value, env),
            Expr::Update {
                op, prefix, target, ..
            } => {
                let old = self.eval(target, env)?.to_number();
                let new = if op == "++" { old + 1.0 } else { old - 1.0 };
                self.store(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Function {
                name, params, body, ..
            } => Ok(Value::Function(Rc::new(Closure {
                name: name.clone(),
                params: params.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
        }
    }

    fn eval_binary(
        &mut self,
        op: &str,
        left: &Expr,
        right: &Expr,
        env: &Env,
    ) -> Result<Value, RuntimeError> {
        let left = self.eval(left, env)?;
        match op {
            "&&" if !left.is_truthy() => Ok(left),
            "||" if left.is_truthy() => Ok(left),
            "&&" | "||" => self.eval(right, env),
            _ => {
                let right = self.eval(right, env)?;
                binary_op(op, &left, &right)
            }
        }
    }

    fn eval_assign(
        &mut self,
        op: &str,
        target: &Expr,
        value: &Expr,
        env: &Env,
    ) -> Result<Value, RuntimeError> {
        let value = self.eval(value, env)?;
        let value = match op {
            "=" => value,
            compound => {
                let current = self.eval(target, env)?;
                binary_op(&compound[..compound.len() - 1], &current, &value)?
            }
        };
        self.store(target, value.clone(), env)?;
        Ok(value)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], env: &Env) -> Result<Value, RuntimeError> {
        if let Expr::Member {
            object, property, ..
        } = callee
        {
            let object = self.eval(object, env)?;
            let args = self.eval_args(args, env)?;
            if let Value::Context(handle) = &object {
                let stored = handle.borrow().get(property)?;
                if let Value::Function(closure) = stored {
                    return self.call_closure(&closure, args);
                }
                return handle.borrow_mut().call(property, &args);
            }
            let method = get_member(&object, property)?;
            return match method {
                Value::Function(closure) => self.call_closure(&closure, args),
                _ => Err(RuntimeError::NotCallable(format!(
                    "{}.{}",
                    object.type_name(),
                    property
                ))),
            };
        }

        let function = self.eval(callee, env)?;
        let args = self.eval_args(args, env)?;
        match &function {
            Value::Function(closure) => self.call_closure(closure, args),
            other => Err(RuntimeError::NotCallable(match callee {
                Expr::Ident { name, .. } => name.clone(),
                _ => other.type_name().to_string(),
            })),
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &Env) -> Result<Vec<Value>, RuntimeError> {
        args.iter().map(|arg| self.eval(arg, env)).collect()
    }

    fn store(&mut self, target: &Expr, value: Value, env: &Env) -> Result<(), RuntimeError> {
        match target {
            Expr::Ident { name, .. } => {
                if let Err(value) = assign_existing(env, name, value) {
                    self.globals.borrow_mut().vars.insert(name.clone(), value);
                }
                Ok(())
            }
            Expr::Member {
                object, property, ..
            } => match self.eval(object, env)? {
                Value::Context(handle) => handle.borrow_mut().set(property, value),
                other => Err(RuntimeError::TypeError {
                    expected: "object".to_string(),
                    got: other.type_name().to_string(),
                }),
            },
            _ => Err(RuntimeError::Custom("invalid assignment target".to_string())),
        }
    }
}

fn get_member(object: &Value, property: &str) -> Result<Value, RuntimeError> {
    match object {
        Value::Context(handle) => handle.borrow().get(property),
        Value::Str(s) if property == "length" => Ok(Value::Number(s.chars().count() as f64)),
        Value::Undefined | Value::Null => Err(RuntimeError::TypeError {
            expected: "object".to_string(),
            got: object.type_name().to_string(),
        }),
        _ => Ok(Value::Undefined),
    }
}

fn binary_op(op: &str, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let value = match op {
        "+" => {
            if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                Value::Str(format!("{}{}", left, right))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        "-" => Value::Number(left.to_number() - right.to_number()),
        "*" => Value::Number(left.to_number() * right.to_number()),
        "/" => Value::Number(left.to_number() / right.to_number()),
        "%" => Value::Number(left.to_number() % right.to_number()),
        "==" => Value::Bool(left.loose_equals(right)),
        "!=" => Value::Bool(!left.loose_equals(right)),
        "===" => Value::Bool(left.strict_equals(right)),
        "!==" => Value::Bool(!left.strict_equals(right)),
        "<" | "<=" | ">" | ">=" => Value::Bool(compare(op, left, right)),
        other => return Err(RuntimeError::Custom(format!("unsupported operator '{}'", other))),
    };
    Ok(value)
}

fn compare(op: &str, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        _ => a >= b,
    }
}
