//! Tree-walking evaluator with cooperative deadline and heap accounting.

use super::ast::{
    BinOp, CmpOp, Comprehension, Expr, FStringPart, FunctionDef, Handler, Stmt, StmtKind, Target,
    UnaryOp,
};
use super::builtins;
use super::error::{Exception, ScriptError, ScriptResult};
use super::host::{HostCall, HostFunction, HostValue};
use super::methods;
use super::modules;
use super::output::OutputCapture;
use super::parser;
use super::value::{
    compare_values, range_item, range_len, values_equal, Closure, Dict, Module, Value,
    MAX_CONTAINER_DEPTH,
};
use crate::permissions::ImportGate;
use serde_json::Value as Json;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Steps between deadline and cancel-flag checks.
const DEADLINE_CHECK_INTERVAL: u64 = 64;
/// Minimum steps between full heap sweeps.
const MEMORY_SWEEP_INTERVAL: u64 = 4096;
/// Per-element cost used when guarding list growth.
const SLOT_BYTES: usize = 32;

/// Limits and collaborators for one interpreter run.
pub struct InterpreterOptions {
    pub deadline: Option<Instant>,
    pub memory_limit: usize,
    pub max_depth: usize,
    pub gate: ImportGate,
    pub output: Arc<Mutex<OutputCapture>>,
    /// Set by an external watchdog; observed like an expired deadline.
    pub cancel: Arc<AtomicBool>,
}

impl InterpreterOptions {
    pub fn new(gate: ImportGate, output: Arc<Mutex<OutputCapture>>) -> Self {
        Self {
            deadline: None,
            memory_limit: usize::MAX,
            max_depth: 200,
            gate,
            output,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    func: Rc<Closure>,
    locals: HashMap<String, Value>,
    line: usize,
}

/// Iteration over a script value without materializing ranges.
pub(crate) enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, remaining: i64, step: i64 },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining <= 0 {
                    return None;
                }
                let value = *next;
                *next = next.wrapping_add(*step);
                *remaining -= 1;
                Some(Value::Int(value))
            }
        }
    }
}

pub(crate) fn iterate(value: &Value) -> ScriptResult<ValueIter> {
    Ok(match value {
        Value::List(items) => ValueIter::Items(items.borrow().clone().into_iter()),
        Value::Str(s) => ValueIter::Items(
            s.chars()
                .map(|c| Value::Str(c.to_string()))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Dict(dict) => ValueIter::Items(
            dict.borrow()
                .keys()
                .map(|k| Value::Str(k.clone()))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Range { start, step, .. } => ValueIter::Range {
            next: *start,
            remaining: range_len(value),
            step: *step,
        },
        other => {
            return Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    })
}

pub(crate) fn dict_key(key: &Value) -> ScriptResult<String> {
    match key {
        Value::Str(s) => Ok(s.clone()),
        other => Err(ScriptError::type_error(format!(
            "dict keys must be str, not {}",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, what: &str) -> ScriptResult<usize> {
    let i = match index {
        Value::Int(_) | Value::Bool(_) => index.as_int().unwrap_or(0),
        other => {
            return Err(ScriptError::type_error(format!(
                "{} indices must be integers, not {}",
                what,
                other.type_name()
            )))
        }
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ScriptError::raise(
            "IndexError",
            format!("{} index out of range", what),
        ));
    }
    Ok(resolved as usize)
}

fn slice_bounds(len: usize, lower: Option<i64>, upper: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len) as usize
    };
    let start = lower.map(clamp).unwrap_or(0);
    let stop = upper.map(clamp).unwrap_or(len as usize);
    (start, stop.max(start))
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    modules: HashMap<String, Rc<Module>>,
    /// Exceptions being handled, for bare `raise`.
    handling: Vec<Exception>,
    module_line: usize,
    opts: InterpreterOptions,
    steps: u64,
    next_sweep: u64,
    heap_estimate: usize,
}

impl Interpreter {
    pub fn new(opts: InterpreterOptions) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            modules: HashMap::new(),
            handling: Vec::new(),
            module_line: 0,
            opts,
            steps: 0,
            next_sweep: MEMORY_SWEEP_INTERVAL,
            heap_estimate: 0,
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn define_json(&mut self, name: &str, value: &Json) {
        self.define(name, Value::from_json(value));
    }

    /// Bind a host function under its own name.
    pub fn define_host(&mut self, function: HostFunction) {
        let name = function.name().to_string();
        self.define(&name, Value::Host(function));
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Parse and execute a program at module level.
    pub fn run(&mut self, src: &str) -> ScriptResult<()> {
        let program = parser::parse(src)?;
        self.check_deadline()?;
        self.exec_block(&program)?;
        Ok(())
    }

    pub(crate) fn write_stdout(&self, text: &str) {
        let mut output = self
            .opts
            .output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        output.write_stdout(text);
    }

    // ---- limits ----

    pub(crate) fn tick(&mut self) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        if self.steps >= self.next_sweep {
            self.check_memory()?;
        }
        Ok(())
    }

    fn check_deadline(&self) -> ScriptResult<()> {
        if self.opts.cancel.load(Ordering::Relaxed) {
            return Err(ScriptError::Timeout);
        }
        match self.opts.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ScriptError::Timeout),
            _ => Ok(()),
        }
    }

    fn check_memory(&mut self) -> ScriptResult<()> {
        let used = self.heap_usage();
        self.heap_estimate = used;
        self.next_sweep = self.steps + MEMORY_SWEEP_INTERVAL.max((used / 64) as u64);
        if used == usize::MAX {
            return Err(ScriptError::MemoryExceeded(format!(
                "containers nested more than {} levels deep",
                MAX_CONTAINER_DEPTH
            )));
        }
        if used > self.opts.memory_limit {
            return Err(ScriptError::MemoryExceeded(format!(
                "script values hold about {} bytes",
                used
            )));
        }
        Ok(())
    }

    fn heap_usage(&self) -> usize {
        let mut seen = HashSet::new();
        let mut total: usize = 0;
        for value in self.globals.values() {
            total = total.saturating_add(value.estimate_into(&mut seen));
        }
        for frame in &self.frames {
            for value in frame.locals.values().chain(frame.func.captured.values()) {
                total = total.saturating_add(value.estimate_into(&mut seen));
            }
        }
        total
    }

    /// Refuse an allocation of `bytes` that would push the heap over the limit.
    pub(crate) fn guard_alloc(&mut self, bytes: usize) -> ScriptResult<()> {
        let limit = self.opts.memory_limit;
        if self.heap_estimate.saturating_add(bytes) <= limit {
            return Ok(());
        }
        // The cached estimate may be stale; re-measure before failing.
        let used = self.heap_usage();
        self.heap_estimate = used;
        if used.saturating_add(bytes) > limit {
            return Err(ScriptError::MemoryExceeded(format!(
                "allocating {} more bytes on top of {} in use",
                bytes, used
            )));
        }
        Ok(())
    }

    pub(crate) fn guard_items(&mut self, count: usize) -> ScriptResult<()> {
        self.guard_alloc(count.saturating_mul(SLOT_BYTES))
    }

    /// Collect an iterable into a vector, refusing oversized ranges up front.
    pub(crate) fn collect(&mut self, value: &Value) -> ScriptResult<Vec<Value>> {
        if let Value::Range { .. } = value {
            self.guard_items(range_len(value).max(0) as usize)?;
        }
        Ok(iterate(value)?.collect())
    }

    // ---- scopes ----

    fn set_line(&mut self, line: usize) {
        match self.frames.last_mut() {
            Some(frame) => frame.line = line,
            None => self.module_line = line,
        }
    }

    fn trace_frames(&self) -> Vec<String> {
        let mut trace = vec![format!(
            "File \"<sandbox>\", line {}, in <module>",
            self.module_line
        )];
        for frame in &self.frames {
            trace.push(format!(
                "File \"<sandbox>\", line {}, in {}",
                frame.line, frame.func.def.name
            ));
        }
        trace
    }

    fn current_line(&self) -> usize {
        self.frames
            .last()
            .map(|f| f.line)
            .unwrap_or(self.module_line)
    }

    fn lookup(&self, name: &str) -> ScriptResult<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.locals.get(name) {
                return Ok(value.clone());
            }
            if let Some(value) = frame.func.captured.get(name) {
                return Ok(value.clone());
            }
            if frame.func.def.name == name {
                return Ok(Value::Function(frame.func.clone()));
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = builtins::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(ScriptError::raise(
            "NameError",
            format!("name '{}' is not defined", name),
        ))
    }

    fn assign_name(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.locals.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                self.assign_name(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items: Vec<Value> = iterate(&value)?.collect();
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(ScriptError::value_error(message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Target::Subscript(object, index) => {
                let container = self.eval(object)?;
                let key = self.eval(index)?;
                self.set_item(&container, key, value)
            }
        }
    }

    fn delete(&mut self, target: &Target) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let removed = match self.frames.last_mut() {
                    Some(frame) => frame.locals.remove(name),
                    None => self.globals.remove(name),
                };
                removed.map(|_| ()).ok_or_else(|| {
                    ScriptError::raise("NameError", format!("name '{}' is not defined", name))
                })
            }
            Target::Tuple(targets) => targets.iter().try_for_each(|t| self.delete(t)),
            Target::Subscript(object, index) => {
                let container = self.eval(object)?;
                let key = self.eval(index)?;
                match &container {
                    Value::List(items) => {
                        let mut items = items.borrow_mut();
                        let i = normalize_index(&key, items.len(), "list")?;
                        items.remove(i);
                        Ok(())
                    }
                    Value::Dict(dict) => {
                        let k = dict_key(&key)?;
                        dict.borrow_mut()
                            .remove(&k)
                            .map(|_| ())
                            .ok_or_else(|| ScriptError::raise("KeyError", key.repr()))
                    }
                    other => Err(ScriptError::type_error(format!(
                        "'{}' object does not support item deletion",
                        other.type_name()
                    ))),
                }
            }
        }
    }

    // ---- statements ----

    pub(crate) fn exec_block(&mut self, body: &[Stmt]) -> ScriptResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ScriptResult<Flow> {
        self.set_line(stmt.line);
        self.tick()?;
        match self.exec_kind(&stmt.kind) {
            Err(ScriptError::Exception(mut exc)) if exc.trace.is_empty() => {
                exc.line = self.current_line();
                exc.trace = self.trace_frames();
                Err(ScriptError::Exception(exc))
            }
            outcome => outcome,
        }
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> ScriptResult<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign(targets, value) => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign(target, op, value) => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(body);
                }
            }
            StmtKind::While(cond, body) => {
                while self.eval(cond)?.truthy() {
                    self.tick()?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::For(target, iter, body) => {
                let iterable = self.eval(iter)?;
                for item in iterate(&iterable)? {
                    self.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Def(def) => {
                let function = self.make_function(def.clone())?;
                self.assign_name(&def.name, function);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse.as_deref(), finalbody.as_deref()),
            StmtKind::Raise(value) => return Err(self.raised(value.as_ref())?),
            StmtKind::Assert(cond, message) => {
                if !self.eval(cond)?.truthy() {
                    let message = match message {
                        Some(expr) => self.eval(expr)?.display(),
                        None => String::new(),
                    };
                    return Err(ScriptError::raise("AssertionError", message));
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Import(names) => {
                for (module, alias) in names {
                    let loaded = self.import_module(module)?;
                    let bound = alias
                        .as_deref()
                        .unwrap_or_else(|| module.split('.').next().unwrap_or(module));
                    self.assign_name(bound, Value::Module(loaded));
                }
            }
            StmtKind::ImportFrom(module, names) => {
                let loaded = self.import_module(module)?;
                for (name, alias) in names {
                    let value = loaded.attrs.get(name).cloned().ok_or_else(|| {
                        ScriptError::raise(
                            "ImportError",
                            format!("cannot import name '{}' from '{}'", name, module),
                        )
                    })?;
                    self.assign_name(alias.as_deref().unwrap_or(name), value);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: Option<&[Stmt]>,
        finalbody: Option<&[Stmt]>,
    ) -> ScriptResult<Flow> {
        let outcome = match self.exec_block(body) {
            Err(ScriptError::Exception(exc)) => self.handle(exc, handlers),
            Ok(Flow::Normal) => match orelse {
                Some(body) => self.exec_block(body),
                None => Ok(Flow::Normal),
            },
            other => other,
        };
        // Limit faults unwind straight out; nothing in the script may observe them.
        if matches!(
            outcome,
            Err(ScriptError::Timeout) | Err(ScriptError::MemoryExceeded(_))
        ) {
            return outcome;
        }
        if let Some(body) = finalbody {
            match self.exec_block(body)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn handle(&mut self, exc: Exception, handlers: &[Handler]) -> ScriptResult<Flow> {
        let handler = handlers
            .iter()
            .find(|h| h.kinds.is_empty() || h.kinds.iter().any(|k| exc.matches(k)));
        let Some(handler) = handler else {
            return Err(ScriptError::Exception(exc));
        };
        if let Some(binding) = &handler.binding {
            self.assign_name(binding, Value::Exception(Rc::new(exc.clone())));
        }
        self.handling.push(exc);
        let outcome = self.exec_block(&handler.body);
        self.handling.pop();
        outcome
    }

    fn raised(&mut self, value: Option<&Expr>) -> ScriptResult<ScriptError> {
        let Some(expr) = value else {
            return Ok(match self.handling.last() {
                Some(exc) => ScriptError::Exception(exc.clone()),
                None => ScriptError::raise("RuntimeError", "No active exception to reraise"),
            });
        };
        Ok(match self.eval(expr)? {
            Value::Exception(exc) => ScriptError::Exception((*exc).clone()),
            Value::Builtin(name) if builtins::is_exception_type(name) => {
                ScriptError::raise(name, "")
            }
            _ => ScriptError::type_error("exceptions must derive from BaseException"),
        })
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = self.augmented(op, current, rhs)?;
                self.assign_name(name, updated);
            }
            Target::Subscript(object, index) => {
                let container = self.eval(object)?;
                let key = self.eval(index)?;
                let current = self.get_item(&container, &key)?;
                let rhs = self.eval(value)?;
                let updated = self.augmented(op, current, rhs)?;
                self.set_item(&container, key, updated)?;
            }
            Target::Tuple(_) => {
                return Err(ScriptError::syntax(
                    "illegal target for augmented assignment",
                    self.current_line(),
                ))
            }
        }
        Ok(())
    }

    fn augmented(&mut self, op: BinOp, current: Value, rhs: Value) -> ScriptResult<Value> {
        if op == BinOp::Add {
            if let (Value::List(items), Value::List(extra)) = (&current, &rhs) {
                // `+=` on a list extends it in place.
                let extra = extra.borrow().clone();
                self.guard_items(extra.len())?;
                items.borrow_mut().extend(extra);
                return Ok(current.clone());
            }
        }
        self.binary(op, &current, &rhs)
    }

    fn import_module(&mut self, name: &str) -> ScriptResult<Rc<Module>> {
        if let Err(err) = self.opts.gate.check_import(name) {
            return Err(ScriptError::raise("ImportError", err.to_string()));
        }
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let module = modules::load(name).ok_or_else(|| {
            ScriptError::raise("ImportError", format!("No module named '{}'", name))
        })?;
        let module = Rc::new(module);
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    // ---- expressions ----

    pub(crate) fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field(expr, spec) => {
                            let value = self.eval(expr)?;
                            match spec {
                                Some(spec) => out.push_str(&builtins::format_value(&value, spec)?),
                                None => out.push_str(&value.display()),
                            }
                        }
                    }
                }
                self.guard_alloc(out.len())?;
                Ok(Value::Str(out))
            }
            Expr::List(items) | Expr::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<ScriptResult<Vec<_>>>()?;
                Ok(Value::list(values))
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = dict_key(&self.eval(key)?)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::Attribute(object, name) => {
                let value = self.eval(object)?;
                self.get_attr(value, name)
            }
            Expr::Subscript(object, index) => {
                let container = self.eval(object)?;
                let key = self.eval(index)?;
                self.get_item(&container, &key)
            }
            Expr::Slice {
                target,
                lower,
                upper,
            } => {
                let container = self.eval(target)?;
                let lower = self.slice_bound(lower.as_deref())?;
                let upper = self.slice_bound(upper.as_deref())?;
                self.slice(&container, lower, upper)
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<ScriptResult<Vec<_>>>()?;
                let mut evaluated = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    evaluated.push((name.clone(), self.eval(value)?));
                }
                self.call_value(&callee, args, evaluated)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, expr) in rest {
                    let right = self.eval(expr)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::IfExp {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::ListComp { element, clause } => {
                let mut out = Vec::new();
                self.comprehend(clause, &mut |interp| {
                    let value = interp.eval(element)?;
                    out.push(value);
                    if out.len() % 1024 == 0 {
                        interp.guard_items(out.len())?;
                    }
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp {
                key,
                value,
                clause,
            } => {
                let mut dict = Dict::new();
                self.comprehend(clause, &mut |interp| {
                    let k = dict_key(&interp.eval(key)?)?;
                    let v = interp.eval(value)?;
                    dict.insert(k, v);
                    if dict.len() % 1024 == 0 {
                        interp.guard_items(dict.len() * 2)?;
                    }
                    Ok(())
                })?;
                Ok(Value::dict(dict))
            }
            Expr::Lambda(def) => self.make_function(def.clone()),
        }
    }

    fn comprehend(
        &mut self,
        clause: &Comprehension,
        emit: &mut dyn FnMut(&mut Self) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        let iterable = self.eval(&clause.iter)?;
        'items: for item in iterate(&iterable)? {
            self.tick()?;
            self.assign(&clause.target, item)?;
            for cond in &clause.conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            emit(self)?;
        }
        Ok(())
    }

    fn make_function(&mut self, def: Rc<FunctionDef>) -> ScriptResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for (_, default) in &def.params {
            defaults.push(match default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        let captured = match self.frames.last() {
            Some(frame) => {
                let mut scope = (*frame.func.captured).clone();
                scope.extend(frame.locals.iter().map(|(k, v)| (k.clone(), v.clone())));
                scope
                    .entry(frame.func.def.name.clone())
                    .or_insert_with(|| Value::Function(frame.func.clone()));
                Rc::new(scope)
            }
            None => Rc::new(HashMap::new()),
        };
        Ok(Value::Function(Rc::new(Closure {
            def,
            defaults,
            captured,
        })))
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> ScriptResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                ScriptError::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn slice(&mut self, container: &Value, lower: Option<i64>, upper: Option<i64>) -> ScriptResult<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let (start, stop) = slice_bounds(items.len(), lower, upper);
                Ok(Value::list(items[start..stop].to_vec()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, stop) = slice_bounds(chars.len(), lower, upper);
                Ok(Value::Str(chars[start..stop].iter().collect()))
            }
            Value::Range { .. } => {
                let items = self.collect(container)?;
                let (start, stop) = slice_bounds(items.len(), lower, upper);
                Ok(Value::list(items[start..stop].to_vec()))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn get_item(&self, container: &Value, key: &Value) -> ScriptResult<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let i = normalize_index(key, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let i = normalize_index(key, len, "string")?;
                Ok(Value::Str(
                    s.chars().nth(i).map(String::from).unwrap_or_default(),
                ))
            }
            Value::Dict(dict) => {
                let k = dict_key(key)?;
                dict.borrow()
                    .get(&k)
                    .cloned()
                    .ok_or_else(|| ScriptError::raise("KeyError", key.repr()))
            }
            Value::Range { start, step, .. } => {
                let i = normalize_index(key, range_len(container).max(0) as usize, "range")?;
                Ok(Value::Int(range_item(*start, *step, i as i64)))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&mut self, container: &Value, key: Value, value: Value) -> ScriptResult<()> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = normalize_index(&key, items.len(), "list")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let k = dict_key(&key)?;
                dict.borrow_mut().insert(k, value);
                Ok(())
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn get_attr(&self, value: Value, name: &str) -> ScriptResult<Value> {
        if let Value::Module(module) = &value {
            return module.attrs.get(name).cloned().ok_or_else(|| {
                ScriptError::raise(
                    "AttributeError",
                    format!("module '{}' has no attribute '{}'", module.name, name),
                )
            });
        }
        if let Value::Exception(exc) = &value {
            if name == "args" {
                return Ok(Value::list(vec![Value::Str(exc.message.clone())]));
            }
        }
        if methods::has_method(&value, name) {
            return Ok(Value::Method(Box::new(value), name.to_string()));
        }
        Err(ScriptError::raise(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", value.type_name(), name),
        ))
    }

    // ---- calls ----

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        self.tick()?;
        match callee {
            Value::Function(closure) => self.call_closure(closure.clone(), args, kwargs),
            Value::Builtin(name) => builtins::call(self, *name, args, kwargs),
            Value::Method(receiver, name) => methods::call(self, receiver, name, args, kwargs),
            Value::Host(function) => self.call_host(function, args, kwargs),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_host(
        &mut self,
        function: &HostFunction,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        let mut call = HostCall::default();
        for arg in &args {
            call.args.push(arg.to_json()?);
        }
        for (name, value) in &kwargs {
            call.kwargs.insert(name.clone(), value.to_json()?);
        }
        // Nothing reaches the host once the watchdog has given up on this run.
        self.check_deadline()?;
        let outcome = function.call(call);
        // A slow host call may have outlived the deadline.
        self.check_deadline()?;
        match outcome {
            Ok(HostValue::Json(json)) => Ok(Value::from_json(&json)),
            Ok(HostValue::Function(function)) => Ok(Value::Host(function)),
            Err(err) => Err(ScriptError::raise(&err.kind, err.message)),
        }
    }

    fn call_closure(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        if self.frames.len() >= self.opts.max_depth {
            return Err(ScriptError::raise(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        let def = closure.def.clone();
        let params = &def.params;
        if args.len() > params.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                params.len(),
                args.len()
            )));
        }

        let mut locals = HashMap::new();
        for ((name, _), arg) in params.iter().zip(args) {
            locals.insert(name.clone(), arg);
        }
        for (name, value) in kwargs {
            if !params.iter().any(|(p, _)| *p == name) {
                return Err(ScriptError::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                )));
            }
            if locals.contains_key(&name) {
                return Err(ScriptError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            locals.insert(name, value);
        }
        for (i, (name, _)) in params.iter().enumerate() {
            if locals.contains_key(name) {
                continue;
            }
            match closure.defaults.get(i).and_then(|d| d.clone()) {
                Some(default) => {
                    locals.insert(name.clone(), default);
                }
                None => {
                    return Err(ScriptError::type_error(format!(
                        "{}() missing required argument: '{}'",
                        def.name, name
                    )))
                }
            }
        }

        self.frames.push(Frame {
            func: closure,
            locals,
            line: 0,
        });
        let outcome = self.exec_block(&def.body);
        self.frames.pop();
        match outcome? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // ---- operators ----

    pub(crate) fn binary(&mut self, op: BinOp, a: &Value, b: &Value) -> ScriptResult<Value> {
        match (op, a, b) {
            (BinOp::Add, Value::Str(x), Value::Str(y)) => {
                self.guard_alloc(x.len() + y.len())?;
                Ok(Value::Str(format!("{}{}", x, y)))
            }
            (BinOp::Add, Value::List(x), Value::List(y)) => {
                let count = x.borrow().len() + y.borrow().len();
                self.guard_items(count)?;
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
                if matches!(n, Value::Int(_) | Value::Bool(_)) =>
            {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                self.guard_alloc(s.len().saturating_mul(count))?;
                Ok(Value::Str(s.repeat(count)))
            }
            (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
                if matches!(n, Value::Int(_) | Value::Bool(_)) =>
            {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                let len = items.borrow().len();
                self.guard_items(len.saturating_mul(count))?;
                let items = items.borrow();
                let mut out = Vec::with_capacity(len * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            (BinOp::Mod, Value::Str(template), arg) => {
                let text = builtins::percent_format(template, arg)?;
                self.guard_alloc(text.len())?;
                Ok(Value::Str(text))
            }
            _ => numeric(op, a, b),
        }
    }

    fn compare(&self, op: CmpOp, a: &Value, b: &Value) -> ScriptResult<bool> {
        Ok(match op {
            CmpOp::Eq => values_equal(a, b),
            CmpOp::Ne => !values_equal(a, b),
            CmpOp::Lt => compare_values(a, b)? == CmpOrdering::Less,
            CmpOp::Le => compare_values(a, b)? != CmpOrdering::Greater,
            CmpOp::Gt => compare_values(a, b)? == CmpOrdering::Greater,
            CmpOp::Ge => compare_values(a, b)? != CmpOrdering::Less,
            CmpOp::In => contains(b, a)?,
            CmpOp::NotIn => !contains(b, a)?,
            CmpOp::Is => identical(a, b),
            CmpOp::IsNot => !identical(a, b),
        })
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
        Value::Dict(dict) => Ok(match item {
            Value::Str(key) => dict.borrow().contains_key(key),
            _ => false,
        }),
        Value::Range { start, stop, step } => Ok(match item.as_int() {
            Some(n) if *step > 0 => {
                n >= *start && n < *stop && (n as i128 - *start as i128) % *step as i128 == 0
            }
            Some(n) => {
                n <= *start && n > *stop && (*start as i128 - n as i128) % -(*step as i128) == 0
            }
            None => false,
        }),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => false,
    }
}

fn unary(op: UnaryOp, value: Value) -> ScriptResult<Value> {
    match (op, &value) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::raise("OverflowError", "integer result too large")),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(value),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (op, other) => Err(ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            other.type_name()
        ))),
    }
}

fn numeric(op: BinOp, a: &Value, b: &Value) -> ScriptResult<Value> {
    match (a, b) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            int_op(op, a.as_int().unwrap_or(0), b.as_int().unwrap_or(0))
        }
        (
            Value::Int(_) | Value::Bool(_) | Value::Float(_),
            Value::Int(_) | Value::Bool(_) | Value::Float(_),
        ) => float_op(op, a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0)),
        _ => Err(ScriptError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn overflow() -> ScriptError {
    ScriptError::raise("OverflowError", "integer result too large")
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::raise("ZeroDivisionError", message)
}

fn int_op(op: BinOp, x: i64, y: i64) -> ScriptResult<Value> {
    match op {
        BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
        BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            let floored = if x % y != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            };
            Ok(Value::Int(floored))
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }))
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
        }
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> ScriptResult<Value> {
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use std::time::Duration;

    fn interpreter() -> (Interpreter, Arc<Mutex<OutputCapture>>) {
        let output = Arc::new(Mutex::new(OutputCapture::new(4096)));
        let gate = ImportGate::from_config(&SandboxConfig::default());
        let mut opts = InterpreterOptions::new(gate, output.clone());
        opts.memory_limit = 1 << 20;
        (Interpreter::new(opts), output)
    }

    fn eval_result(src: &str) -> Json {
        let (mut interp, _) = interpreter();
        interp.run(src).unwrap();
        interp.global("result").unwrap().to_json().unwrap()
    }

    fn raised_kind(src: &str) -> String {
        let (mut interp, _) = interpreter();
        match interp.run(src) {
            Err(ScriptError::Exception(exc)) => exc.kind,
            other => panic!("expected exception, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn arithmetic_follows_python_semantics() {
        assert_eq!(eval_result("result = 2 + 2"), serde_json::json!(4));
        assert_eq!(eval_result("result = -7 // 2"), serde_json::json!(-4));
        assert_eq!(eval_result("result = -7 % 3"), serde_json::json!(2));
        assert_eq!(eval_result("result = 7 / 2"), serde_json::json!(3.5));
        assert_eq!(eval_result("result = 2 ** 10"), serde_json::json!(1024));
    }

    #[test]
    fn functions_closures_and_recursion() {
        let src = r#"
def make_adder(n):
    def add(x):
        return x + n
    return add

def fact(n):
    return 1 if n <= 1 else n * fact(n - 1)

add5 = make_adder(5)
result = [add5(1), fact(5)]
"#;
        assert_eq!(eval_result(src), serde_json::json!([6, 120]));
    }

    #[test]
    fn nested_function_can_recurse() {
        let src = r#"
def outer(n):
    def walk(k):
        return 0 if k == 0 else k + walk(k - 1)
    return walk(n)
result = outer(4)
"#;
        assert_eq!(eval_result(src), serde_json::json!(10));
    }

    #[test]
    fn try_except_finally_flow() {
        let src = r#"
log = []
try:
    {}["missing"]
except KeyError as e:
    log.append("caught")
finally:
    log.append("finally")
result = log
"#;
        assert_eq!(eval_result(src), serde_json::json!(["caught", "finally"]));
    }

    #[test]
    fn uncaught_exception_carries_trace() {
        let (mut interp, _) = interpreter();
        let err = interp
            .run("def f():\n    return 1 / 0\n\nf()\n")
            .unwrap_err();
        match err {
            ScriptError::Exception(exc) => {
                assert_eq!(exc.kind, "ZeroDivisionError");
                assert_eq!(exc.line, 2);
                assert_eq!(exc.trace.len(), 2);
                assert!(exc.trace[1].contains("in f"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn import_gate_raises_import_error() {
        assert_eq!(raised_kind("import os"), "ImportError");
        assert_eq!(eval_result("import math\nresult = math.floor(2.7)"), serde_json::json!(2));
    }

    #[test]
    fn recursion_is_bounded() {
        assert_eq!(raised_kind("def f(n):\n    return f(n + 1)\nf(0)"), "RecursionError");
    }

    #[test]
    fn deadline_stops_infinite_loop() {
        let output = Arc::new(Mutex::new(OutputCapture::new(64)));
        let gate = ImportGate::from_config(&SandboxConfig::default());
        let mut opts = InterpreterOptions::new(gate, output);
        opts.deadline = Some(Instant::now() + Duration::from_millis(50));
        let mut interp = Interpreter::new(opts);
        assert!(matches!(interp.run("while True:\n    pass"), Err(ScriptError::Timeout)));
    }

    #[test]
    fn cancel_flag_stops_execution() {
        let output = Arc::new(Mutex::new(OutputCapture::new(64)));
        let gate = ImportGate::from_config(&SandboxConfig::default());
        let opts = InterpreterOptions::new(gate, output);
        opts.cancel.store(true, Ordering::Relaxed);
        let mut interp = Interpreter::new(opts);
        assert!(matches!(
            interp.run("x = 0\nwhile True:\n    x += 1"),
            Err(ScriptError::Timeout)
        ));
    }

    #[test]
    fn oversized_allocation_is_refused() {
        let (mut interp, _) = interpreter();
        assert!(matches!(
            interp.run("x = 'a' * 10000000"),
            Err(ScriptError::MemoryExceeded(_))
        ));
    }

    #[test]
    fn growing_list_hits_memory_ceiling() {
        let (mut interp, _) = interpreter();
        let src = "data = []\nwhile True:\n    data.append('x' * 100)";
        assert!(matches!(interp.run(src), Err(ScriptError::MemoryExceeded(_))));
    }

    #[test]
    fn print_goes_to_output_capture() {
        let (mut interp, output) = interpreter();
        interp.run("print('hello', 42)\nprint(f'{1 + 1:>3}')").unwrap();
        assert_eq!(output.lock().unwrap().stdout(), "hello 42\n  2\n");
    }

    #[test]
    fn host_errors_become_catchable_exceptions() {
        let (mut interp, _) = interpreter();
        interp.define_host(HostFunction::new("boom", |_| {
            Err(super::super::host::HostError::new("ToolError", "offline"))
        }));
        interp
            .run("try:\n    boom()\n    result = 'no'\nexcept ToolError as e:\n    result = str(e)")
            .unwrap();
        assert_eq!(
            interp.global("result").unwrap().to_json().unwrap(),
            serde_json::json!("offline")
        );
    }

    #[test]
    fn ranges_at_integer_limits() {
        assert_eq!(raised_kind("len(range(-1, 9223372036854775807))"), "OverflowError");
        assert_eq!(
            eval_result(
                "r = range(-1, 9223372036854775807)\nresult = [r[0], r[1], 9223372036854775806 in r, bool(r)]"
            ),
            serde_json::json!([-1, 0, true, true])
        );
        assert_eq!(
            eval_result("result = [i for i in range(9223372036854775805, 9223372036854775807)]"),
            serde_json::json!([9223372036854775805i64, 9223372036854775806i64])
        );
    }

    #[test]
    fn no_host_call_after_cancellation() {
        let output = Arc::new(Mutex::new(OutputCapture::new(64)));
        let gate = ImportGate::from_config(&SandboxConfig::default());
        let opts = InterpreterOptions::new(gate, output);
        let cancel = Arc::clone(&opts.cancel);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut interp = Interpreter::new(opts);

        interp.define_host(HostFunction::new("trip", move |_| {
            cancel.store(true, Ordering::Relaxed);
            Ok(HostValue::Json(Json::Null))
        }));
        let seen = Arc::clone(&calls);
        interp.define_host(HostFunction::new("record", move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(HostValue::Json(Json::Null))
        }));

        assert!(matches!(
            interp.run("record()\ntrip()\nrecord()"),
            Err(ScriptError::Timeout)
        ));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
