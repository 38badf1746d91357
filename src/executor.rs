use crate::ast::Statement;
use crate::error::{BlocksError, BlocksResult};
use crate::interp::{Interpreter, RuntimeError, Value};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::sketch::ContextHandle;
use std::rc::Rc;

/// Turns rewritten sketch source into something that can be started against a drawing context.
pub trait Executor {
    fn compile(&self, source: &str) -> BlocksResult<CompiledSketch>;
}

/// Compiles source as the body of a one-parameter function; the parameter is the binding name
/// the rewriter namespaced every drawing global under.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    binding: String,
}

impl ScriptExecutor {
    pub fn new(binding: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
        }
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new("p5")
    }
}

impl Executor for ScriptExecutor {
    #[tracing::instrument(skip_all, fields(bytes = source.len()))]
    fn compile(&self, source: &str) -> BlocksResult<CompiledSketch> {
        let tokens = Lexer::new(source)
            .tokenize()
            .map_err(|e| BlocksError::generation(e.message, e.pos))?;
        let script = Parser::new(tokens)
            .parse_script()
            .map_err(|e| BlocksError::generation(e.message, e.pos))?;
        tracing::debug!(statements = script.body.len(), "compiled sketch");
        Ok(CompiledSketch {
            binding: self.binding.clone(),
            body: Rc::new(script.body),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSketch {
    binding: String,
    body: Rc<Vec<Statement>>,
}

impl CompiledSketch {
    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Runs the compiled body with `context` bound, then the `setup` hook if one was installed.
    /// If either fails the new instance is torn down before the error is returned.
    pub fn start(&self, context: ContextHandle) -> BlocksResult<RunningInstance> {
        let mut instance = RunningInstance {
            interp: Interpreter::new(),
            context: Some(context.clone()),
            frames: 0,
        };
        let entry = instance
            .interp
            .function(&[self.binding.clone()], self.body.clone());
        instance
            .interp
            .call(&entry, vec![Value::Context(context)])?;
        instance.invoke_hook("setup")?;
        Ok(instance)
    }
}

/// A started sketch. Dropping it tears it down.
pub struct RunningInstance {
    interp: Interpreter,
    context: Option<ContextHandle>,
    frames: u64,
}

impl RunningInstance {
    pub fn context(&self) -> Option<&ContextHandle> {
        self.context.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.context.is_some()
    }

    /// Frames drawn so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Runs `frames` iterations of the `draw` hook.
    pub fn advance(&mut self, frames: u64) -> BlocksResult<()> {
        for _ in 0..frames {
            self.live_context()?.borrow_mut().begin_frame();
            self.invoke_hook("draw")?;
            self.frames += 1;
        }
        Ok(())
    }

    /// Moves the pointer to `(x, y)` and runs the `mousePressed` hook.
    pub fn click(&mut self, x: f64, y: f64) -> BlocksResult<bool> {
        self.live_context()?.borrow_mut().move_pointer(x, y);
        self.invoke_hook("mousePressed")
    }

    /// Releases the drawing context. Later calls do nothing.
    pub fn teardown(&mut self) {
        if let Some(context) = self.context.take() {
            context.borrow_mut().remove();
            self.interp.clear();
            tracing::debug!(frames = self.frames, "sketch instance torn down");
        }
    }

    fn live_context(&self) -> BlocksResult<ContextHandle> {
        self.context
            .clone()
            .ok_or(BlocksError::Runtime(RuntimeError::InstanceRemoved))
    }

    fn invoke_hook(&mut self, name: &str) -> BlocksResult<bool> {
        let hook = self.live_context()?.borrow().get(name)?;
        match hook {
            Value::Function(_) => {
                self.interp.call(&hook, Vec::new())?;
                Ok(true)
            }
            Value::Undefined | Value::Null => Ok(false),
            other => Err(RuntimeError::NotCallable(format!(
                "{} ({})",
                name,
                other.type_name()
            ))
            .into()),
        }
    }
}

impl Drop for RunningInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// One place a sketch can run. Holds at most one running instance.
pub struct Mount<E: Executor = ScriptExecutor> {
    executor: E,
    current: Option<RunningInstance>,
}

impl<E: Executor> Mount<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            current: None,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn current(&self) -> Option<&RunningInstance> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut RunningInstance> {
        self.current.as_mut()
    }

    /// Compiles `source` and starts it on a context from `factory`. The previous instance is
    /// torn down only once the new source has compiled; on a compile error it keeps running.
    #[tracing::instrument(skip_all)]
    pub fn run<F>(&mut self, source: &str, factory: F) -> BlocksResult<&mut RunningInstance>
    where
        F: FnOnce() -> ContextHandle,
    {
        let compiled = match self.executor.compile(source) {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::warn!(error = %e, running = self.current.is_some(), "sketch failed to compile");
                return Err(e);
            }
        };
        if let Some(mut previous) = self.current.take() {
            previous.teardown();
        }
        let instance = compiled.start(factory())?;
        Ok(self.current.insert(instance))
    }

    /// Tears down the running instance, if any.
    pub fn stop(&mut self) -> bool {
        match self.current.take() {
            Some(mut instance) => {
                instance.teardown();
                true
            }
            None => false,
        }
    }
}

impl Default for Mount<ScriptExecutor> {
    fn default() -> Self {
        Self::new(ScriptExecutor::default())
    }
}
