//! Tree-walking evaluator with an injected line tracer.
//!
//! Every completed simple statement, and every evaluation of an `if`,
//! `while` or `for` header, is reported to the [`Tracer`] together with the
//! live call stack and heap. The tracer can interrupt the run by returning
//! an [`Interrupt`], which unwinds the evaluator without running any more
//! user code.

use crate::runtime::ast::*;
use crate::runtime::builtins::SymbolTable;
use crate::runtime::value::*;
use crate::trace::tracer::{Interrupt, StateView, Tracer};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Items a builtin processes between deadline checks.
const POLL_INTERVAL: usize = 4096;

/// Bounds applied by the evaluator itself, independent of the tracer.
#[derive(Debug, Clone)]
pub struct EvalLimits {
    pub max_call_depth: usize,
    pub max_heap_objects: usize,
    pub max_collection_len: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_heap_objects: 100_000,
            max_collection_len: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    Function,
    /// Body of a class statement; the class object already exists
    ClassBody(ObjId),
}

/// One activation on the evaluator's call stack.
#[derive(Debug, Clone)]
pub struct FrameState {
    pub name: Rc<str>,
    pub line: u32,
    /// Local bindings; the globals for the module frame
    pub scope: ScopeRef,
    pub kind: FrameKind,
    pub(crate) closure: Vec<ScopeRef>,
    pub(crate) global_names: Vec<String>,
    /// Defining class and name of the first parameter, for `super()`
    pub(crate) super_context: Option<(ObjId, String)>,
    /// Definition being executed, for function frames
    pub(crate) function: Option<Rc<FunctionDef>>,
}

impl FrameState {
    /// Whether `name` is a local of this function frame, bound or not.
    fn owns_local(&self, name: &str) -> bool {
        self.function
            .as_ref()
            .is_some_and(|def| def.locals.contains(name))
    }

    fn detached(&self) -> FrameState {
        FrameState {
            scope: Rc::new(RefCell::new(self.scope.borrow().clone())),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExcOrigin {
    Builtin(ExcKind),
    Instance { instance: ObjId, class: ObjId },
}

#[derive(Debug, Clone)]
pub struct PyException {
    pub origin: ExcOrigin,
    pub kind_name: String,
    pub message: String,
    pub line: u32,
    /// Call stack at the point the exception was raised
    pub frames: Vec<FrameState>,
}

impl PyException {
    pub fn describe(&self) -> String {
        if self.message.is_empty() {
            self.kind_name.clone()
        } else {
            format!("{}: {}", self.kind_name, self.message)
        }
    }
}

#[derive(Debug)]
pub enum Unwind {
    Exception(Box<PyException>),
    Interrupted(Interrupt),
}

impl From<Interrupt> for Unwind {
    fn from(interrupt: Interrupt) -> Self {
        Unwind::Interrupted(interrupt)
    }
}

pub(crate) type Eval<T> = Result<T, Unwind>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Uncaught exception at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: String,
    pub message: String,
    pub line: u32,
}

impl Fault {
    /// `Kind: message`, as recorded on the final trace step.
    pub fn headline(&self) -> String {
        if self.message.is_empty() {
            self.kind.clone()
        } else {
            format!("{}: {}", self.kind, self.message)
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.headline(), self.line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    Fault(Fault),
    Interrupted(Interrupt),
}

/// Lazy iteration state over an iterable value.
pub(crate) enum PyIter {
    Range { next: i64, stop: i64, step: i64 },
    List { id: ObjId, index: usize },
    Items { items: Vec<Value>, index: usize },
}

pub struct Interpreter<'t> {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) globals: ScopeRef,
    pub(crate) frames: Vec<FrameState>,
    pub(crate) limits: EvalLimits,
    tracer: &'t mut dyn Tracer,
    /// Exceptions currently being handled, for bare `raise`
    handling: Vec<PyException>,
}

impl<'t> Interpreter<'t> {
    pub fn new(symbols: SymbolTable, limits: EvalLimits, tracer: &'t mut dyn Tracer) -> Self {
        let globals: ScopeRef = Rc::new(RefCell::new(Scope::new()));
        let module = FrameState {
            name: Rc::from("<module>"),
            line: 1,
            scope: globals.clone(),
            kind: FrameKind::Module,
            closure: Vec::new(),
            global_names: Vec::new(),
            super_context: None,
            function: None,
        };
        Self {
            heap: Heap::new(limits.max_heap_objects),
            symbols,
            globals,
            frames: vec![module],
            limits,
            tracer,
            handling: Vec::new(),
        }
    }

    /// Execute a parsed program in the module frame.
    pub fn run(&mut self, program: &Block) -> Result<(), RunError> {
        match self.exec_block(program) {
            Ok(_) => Ok(()),
            Err(Unwind::Interrupted(interrupt)) => Err(RunError::Interrupted(interrupt)),
            Err(Unwind::Exception(exc)) => {
                let headline = exc.describe();
                self.tracer.on_fault(
                    &StateView {
                        line: exc.line,
                        frames: &exc.frames,
                        heap: &self.heap,
                        output: self.symbols.output.text(),
                    },
                    &headline,
                );
                Err(RunError::Fault(Fault {
                    kind: exc.kind_name.clone(),
                    message: exc.message.clone(),
                    line: exc.line,
                }))
            }
        }
    }

    pub fn output(&self) -> &str {
        self.symbols.output.text()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn globals(&self) -> &ScopeRef {
        &self.globals
    }

    // ---- shared helpers ---------------------------------------------------

    fn frame(&self) -> &FrameState {
        // The module frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut FrameState {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub(crate) fn current_line(&self) -> u32 {
        self.frame().line
    }

    fn set_line(&mut self, line: u32) {
        self.frame_mut().line = line;
    }

    fn trace_line(&mut self) -> Eval<()> {
        let view = StateView {
            line: self.current_line(),
            frames: &self.frames,
            heap: &self.heap,
            output: self.symbols.output.text(),
        };
        self.tracer.on_line(&view).map_err(Unwind::Interrupted)
    }

    pub(crate) fn poll(&mut self) -> Eval<()> {
        self.tracer.poll().map_err(Unwind::Interrupted)
    }

    pub(crate) fn error(&self, kind: ExcKind, message: impl Into<String>) -> Unwind {
        Unwind::Exception(Box::new(PyException {
            origin: ExcOrigin::Builtin(kind),
            kind_name: kind.name().to_string(),
            message: message.into(),
            line: self.current_line(),
            frames: self.frames.iter().map(FrameState::detached).collect(),
        }))
    }

    pub(crate) fn type_error<T>(&self, message: impl Into<String>) -> Eval<T> {
        Err(self.error(ExcKind::TypeError, message))
    }

    pub(crate) fn value_error<T>(&self, message: impl Into<String>) -> Eval<T> {
        Err(self.error(ExcKind::ValueError, message))
    }

    pub(crate) fn type_name(&self, value: &Value) -> String {
        self.heap.type_name(value)
    }

    pub(crate) fn check_len(&self, len: usize) -> Eval<()> {
        if len > self.limits.max_collection_len {
            return Err(self.error(
                ExcKind::MemoryError,
                format!(
                    "collection of {} elements exceeds the limit of {}",
                    len, self.limits.max_collection_len
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn alloc(&mut self, object: Object) -> Eval<Value> {
        match self.heap.alloc(object) {
            Ok(id) => Ok(Value::Obj(id)),
            Err(e) => Err(self.error(ExcKind::MemoryError, e.to_string())),
        }
    }

    pub(crate) fn new_list(&mut self, items: Vec<Value>) -> Eval<Value> {
        self.check_len(items.len())?;
        self.alloc(Object::List(items))
    }

    pub(crate) fn new_tuple(&mut self, items: Vec<Value>) -> Eval<Value> {
        self.check_len(items.len())?;
        self.alloc(Object::Tuple(items))
    }

    pub(crate) fn new_set(&mut self, items: Vec<Value>) -> Eval<Value> {
        let mut unique = SetStore::default();
        for (i, item) in items.into_iter().enumerate() {
            if i % POLL_INTERVAL == 0 {
                self.poll()?;
            }
            let hash = self.hash_key(&item)?;
            unique.insert(hash, item);
        }
        self.check_len(unique.len())?;
        self.alloc(Object::Set(unique))
    }

    pub(crate) fn new_dict(&mut self, pairs: Vec<(Value, Value)>) -> Eval<Value> {
        let mut entries = DictStore::default();
        for (i, (key, value)) in pairs.into_iter().enumerate() {
            if i % POLL_INTERVAL == 0 {
                self.poll()?;
            }
            let hash = self.hash_key(&key)?;
            entries.insert(hash, key, value);
        }
        self.check_len(entries.len())?;
        self.alloc(Object::Dict(entries))
    }

    /// Hash identity of a dict key or set member.
    pub(crate) fn hash_key(&self, value: &Value) -> Eval<HashKey> {
        match self.heap.hash_key(value) {
            Some(hash) => Ok(hash),
            None => self.type_error(format!("unhashable type: '{}'", self.unhashable_part(value))),
        }
    }

    /// Type name of the first unhashable value inside `value`.
    fn unhashable_part(&self, value: &Value) -> String {
        if let Some(Object::Tuple(items)) = value.as_obj().map(|id| self.heap.get(id)) {
            if let Some(inner) = items.iter().find(|v| self.heap.hash_key(v).is_none()) {
                return self.unhashable_part(inner);
            }
        }
        self.type_name(value)
    }

    pub(crate) fn truthy(&mut self, value: &Value) -> Eval<bool> {
        if let Value::Obj(id) = value {
            if let Object::Instance { class, .. } = self.heap.get(*id) {
                let class = *class;
                if let Some(method) = self.heap.class_attr(class, "__bool__") {
                    let result = self.call_value(method, vec![value.clone()], Vec::new())?;
                    return Ok(self.heap.truthy(&result));
                }
                if let Some(method) = self.heap.class_attr(class, "__len__") {
                    let result = self.call_value(method, vec![value.clone()], Vec::new())?;
                    return Ok(self.heap.truthy(&result));
                }
            }
        }
        Ok(self.heap.truthy(value))
    }

    // ---- names ------------------------------------------------------------

    fn lookup(&self, name: &str) -> Eval<Value> {
        let frame = self.frame();
        if let Some(v) = frame.scope.borrow().get(name) {
            return Ok(v.clone());
        }
        if frame.owns_local(name) {
            return Err(self.error(
                ExcKind::UnboundLocalError,
                format!(
                    "cannot access local variable '{}' where it is not associated with a value",
                    name
                ),
            ));
        }
        for scope in &frame.closure {
            if let Some(v) = scope.borrow().get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.globals.borrow().get(name) {
            return Ok(v.clone());
        }
        self.symbols
            .lookup(name)
            .ok_or_else(|| self.error(ExcKind::NameError, format!("name '{}' is not defined", name)))
    }

    fn assign_name(&mut self, name: &str, value: Value) {
        let frame = self.frame();
        let scope = if frame.global_names.iter().any(|g| g == name) {
            self.globals.clone()
        } else {
            frame.scope.clone()
        };
        scope.borrow_mut().insert(name.to_string(), value);
    }

    fn delete_name(&mut self, name: &str) -> Eval<()> {
        let frame = self.frame();
        let scope = if frame.global_names.iter().any(|g| g == name) {
            self.globals.clone()
        } else {
            frame.scope.clone()
        };
        let removed = scope.borrow_mut().remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(self.error(ExcKind::NameError, format!("name '{}' is not defined", name))),
        }
    }

    // ---- statements -------------------------------------------------------

    fn exec_block(&mut self, block: &[Stmt]) -> Eval<Flow> {
        for stmt in block {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Eval<Flow> {
        self.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for branch in branches {
                    self.set_line(branch.line);
                    let test = self.eval(&branch.test)?;
                    let taken = self.truthy(&test)?;
                    self.trace_line()?;
                    if taken {
                        return self.exec_block(&branch.body);
                    }
                }
                return match orelse {
                    Some(body) => self.exec_block(body),
                    None => Ok(Flow::Normal),
                };
            }
            StmtKind::While { test, body } => {
                loop {
                    self.set_line(stmt.line);
                    let value = self.eval(test)?;
                    let go = self.truthy(&value)?;
                    self.trace_line()?;
                    if !go {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return Ok(Flow::Normal);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                let mut it = self.make_iter(&iterable)?;
                loop {
                    self.set_line(stmt.line);
                    let Some(item) = self.next_item(&mut it) else {
                        self.trace_line()?;
                        break;
                    };
                    self.assign(target, item)?;
                    self.trace_line()?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return Ok(Flow::Normal);
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.assign_name(&def.name, function);
            }
            StmtKind::ClassDef { name, base, body } => {
                let class = self.class_def(name, base.as_ref(), body)?;
                self.set_line(stmt.line);
                self.assign_name(name, class);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                self.trace_line()?;
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => {
                self.trace_line()?;
                return Ok(Flow::Break);
            }
            StmtKind::Continue => {
                self.trace_line()?;
                return Ok(Flow::Continue);
            }
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                if self.frame().kind != FrameKind::Module {
                    let frame = self.frame_mut();
                    for name in names {
                        if !frame.global_names.contains(name) {
                            frame.global_names.push(name.clone());
                        }
                    }
                }
            }
            StmtKind::Import(module) => {
                return Err(self.error(
                    ExcKind::ImportError,
                    format!("import of module '{}' is not permitted", module),
                ));
            }
            StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref())?),
            StmtKind::Assert { test, msg } => {
                let value = self.eval(test)?;
                if !self.truthy(&value)? {
                    let message = match msg {
                        Some(m) => {
                            let m = self.eval(m)?;
                            self.to_str(&m)?
                        }
                        None => String::new(),
                    };
                    return Err(self.error(ExcKind::AssertionError, message));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.try_stmt(body, handlers, orelse.as_deref(), finalbody.as_deref()),
        }
        self.trace_line()?;
        Ok(Flow::Normal)
    }

    fn try_stmt(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: Option<&[Stmt]>,
        finalbody: Option<&[Stmt]>,
    ) -> Eval<Flow> {
        let result = match self.exec_block(body) {
            Err(Unwind::Exception(exc)) => self.handle(*exc, handlers),
            Ok(Flow::Normal) => match orelse {
                Some(block) => self.exec_block(block),
                None => Ok(Flow::Normal),
            },
            other => other,
        };
        let Some(finalbody) = finalbody else {
            return result;
        };
        if matches!(result, Err(Unwind::Interrupted(_))) {
            return result;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => result,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, exc: PyException, handlers: &[ExceptHandler]) -> Eval<Flow> {
        for handler in handlers {
            self.set_line(handler.line);
            let matched = match &handler.kind {
                None => true,
                Some(expr) => {
                    let class = self.eval(expr)?;
                    self.exception_matches(&exc, &class)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                let value = self.exception_value(&exc)?;
                self.assign_name(name, value);
            }
            self.handling.push(exc);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            return result;
        }
        Err(Unwind::Exception(Box::new(exc)))
    }

    fn exception_matches(&self, exc: &PyException, class: &Value) -> Eval<bool> {
        match class {
            Value::Builtin(Builtin::Exception(kind)) => Ok(match &exc.origin {
                ExcOrigin::Builtin(k) => k.is_subclass_of(*kind),
                ExcOrigin::Instance { class, .. } => self
                    .heap
                    .exception_root(*class)
                    .is_some_and(|root| root.is_subclass_of(*kind)),
            }),
            Value::Obj(id) => match self.heap.get(*id) {
                Object::Class(_) => Ok(match &exc.origin {
                    ExcOrigin::Instance { class, .. } => self.heap.is_subclass(*class, *id),
                    ExcOrigin::Builtin(_) => false,
                }),
                Object::Tuple(items) => {
                    for item in items {
                        if self.exception_matches(exc, item)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                _ => self.type_error("catching classes that do not inherit from BaseException is not allowed"),
            },
            _ => self.type_error("catching classes that do not inherit from BaseException is not allowed"),
        }
    }

    fn exception_value(&mut self, exc: &PyException) -> Eval<Value> {
        match &exc.origin {
            ExcOrigin::Instance { instance, .. } => Ok(Value::Obj(*instance)),
            ExcOrigin::Builtin(kind) => self.alloc(Object::Exception {
                kind: *kind,
                message: Rc::from(exc.message.as_str()),
            }),
        }
    }

    /// Build the exception for a `raise` statement.
    fn raise(&mut self, exc: Option<&Expr>) -> Eval<Unwind> {
        let Some(expr) = exc else {
            return Ok(match self.handling.last() {
                Some(active) => {
                    let mut again = active.clone();
                    again.line = self.current_line();
                    Unwind::Exception(Box::new(again))
                }
                None => self.error(ExcKind::RuntimeError, "No active exception to reraise"),
            });
        };
        let mut value = self.eval(expr)?;
        // `raise ValueError` and `raise MyError` instantiate the class.
        let is_class = match &value {
            Value::Builtin(Builtin::Exception(_)) => true,
            Value::Obj(id) => matches!(self.heap.get(*id), Object::Class(_)),
            _ => false,
        };
        if is_class {
            value = self.call_value(value, Vec::new(), Vec::new())?;
        }
        self.exception_from_value(&value)
    }

    fn exception_from_value(&mut self, value: &Value) -> Eval<Unwind> {
        let Value::Obj(id) = value else {
            return Ok(self.error(ExcKind::TypeError, "exceptions must derive from BaseException"));
        };
        match self.heap.get(*id).clone() {
            Object::Exception { kind, message } => Ok(self.error(kind, message.to_string())),
            Object::Instance { class, .. } if self.heap.exception_root(class).is_some() => {
                let message = self.to_str(value)?;
                Ok(Unwind::Exception(Box::new(PyException {
                    origin: ExcOrigin::Instance {
                        instance: *id,
                        class,
                    },
                    kind_name: self.heap.class_name(class).to_string(),
                    message,
                    line: self.current_line(),
                    frames: self.frames.iter().map(FrameState::detached).collect(),
                })))
            }
            _ => Ok(self.error(ExcKind::TypeError, "exceptions must derive from BaseException")),
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Eval<Value> {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        let frame = self.frame();
        let (closure, owner) = match frame.kind {
            FrameKind::Module => (Vec::new(), None),
            FrameKind::Function => {
                let mut chain = vec![frame.scope.clone()];
                chain.extend(frame.closure.iter().cloned());
                (chain, None)
            }
            FrameKind::ClassBody(class) => (frame.closure.clone(), Some(class)),
        };
        self.alloc(Object::Function(Function {
            def: def.clone(),
            defaults,
            closure,
            owner,
        }))
    }

    fn class_def(&mut self, name: &str, base: Option<&Expr>, body: &[Stmt]) -> Eval<Value> {
        let base = match base {
            None => None,
            Some(expr) => match self.eval(expr)? {
                Value::Builtin(Builtin::Type(TypeName::Object)) => None,
                v @ Value::Builtin(Builtin::Exception(_)) => Some(v),
                Value::Obj(id) if matches!(self.heap.get(id), Object::Class(_)) => Some(Value::Obj(id)),
                other => {
                    return self.type_error(format!(
                        "cannot inherit from '{}'",
                        self.type_name(&other)
                    ))
                }
            },
        };
        let class = self.alloc(Object::Class(Class {
            name: name.to_string(),
            base,
            attrs: Default::default(),
        }))?;
        let Some(class_id) = class.as_obj() else {
            return Ok(class);
        };

        if self.frames.len() > self.limits.max_call_depth {
            return Err(self.error(ExcKind::RecursionError, "maximum recursion depth exceeded"));
        }
        let frame = self.frame();
        let closure = match frame.kind {
            FrameKind::Function => {
                let mut chain = vec![frame.scope.clone()];
                chain.extend(frame.closure.iter().cloned());
                chain
            }
            _ => frame.closure.clone(),
        };
        let line = body.first().map_or(frame.line, |s| s.line);
        let scope: ScopeRef = Rc::new(RefCell::new(Scope::new()));
        self.frames.push(FrameState {
            name: Rc::from(name),
            line,
            scope: scope.clone(),
            kind: FrameKind::ClassBody(class_id),
            closure,
            global_names: Vec::new(),
            super_context: None,
            function: None,
        });
        let result = self.exec_block(body);
        self.frames.pop();
        result?;

        let attrs = scope.borrow().clone();
        if let Object::Class(c) = self.heap.get_mut(class_id) {
            c.attrs = attrs;
        }
        Ok(class)
    }

    // ---- assignment -------------------------------------------------------

    pub(crate) fn assign(&mut self, target: &Target, value: Value) -> Eval<()> {
        match target {
            Target::Name(name) => {
                self.assign_name(name, value);
                Ok(())
            }
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval(obj)?;
                self.set_attr(&obj, attr, value)
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.set_slice(&container, bounds, value);
                }
                let index = self.eval(index)?;
                self.set_item(&container, index, value)
            }
            Target::Unpack(targets) => {
                let items = self.iterate(&value)?;
                if items.len() > targets.len() {
                    return self.value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ));
                }
                if items.len() < targets.len() {
                    return self.value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, rhs: &Expr) -> Eval<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(rhs)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.assign_name(name, result);
            }
            Target::Attribute { value, attr } => {
                let obj = self.eval(value)?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval(rhs)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_attr(&obj, attr, result)?;
            }
            Target::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                let current = self.get_item(&container, &index)?;
                let rhs = self.eval(rhs)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_item(&container, index, result)?;
            }
            Target::Unpack(_) => {
                return self.type_error("illegal expression for augmented assignment");
            }
        }
        Ok(())
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn inplace_op(&mut self, op: BinOp, current: Value, rhs: Value) -> Eval<Value> {
        if op == BinOp::Add {
            if let Value::Obj(id) = &current {
                if matches!(self.heap.get(*id), Object::List(_)) {
                    let extra = self.iterate(&rhs)?;
                    self.extend_list(*id, extra)?;
                    return Ok(current);
                }
            }
        }
        self.binary_op(op, current, rhs)
    }

    pub(crate) fn extend_list(&mut self, id: ObjId, extra: Vec<Value>) -> Eval<()> {
        let len = match self.heap.get(id) {
            Object::List(items) => items.len(),
            _ => 0,
        };
        self.check_len(len + extra.len())?;
        if let Object::List(items) = self.heap.get_mut(id) {
            items.extend(extra);
        }
        Ok(())
    }

    fn delete(&mut self, target: &Target) -> Eval<()> {
        match target {
            Target::Name(name) => self.delete_name(name),
            Target::Attribute { value, attr } => {
                let obj = self.eval(value)?;
                let removed = match obj.as_obj().map(|id| self.heap.get_mut(id)) {
                    Some(Object::Instance { attrs, .. }) => attrs.remove(attr).is_some(),
                    Some(Object::Class(class)) => class.attrs.remove(attr).is_some(),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(self.error(
                        ExcKind::AttributeError,
                        format!("'{}' object has no attribute '{}'", self.type_name(&obj), attr),
                    ))
                }
            }
            Target::Subscript { value, index } => {
                let container = self.eval(value)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.delete_slice(&container, bounds);
                }
                let index = self.eval(index)?;
                self.delete_item(&container, &index)
            }
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    // ---- expressions ------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Constant(c) => Ok(match c {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(x) => Value::Float(*x),
                Constant::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = self.eval_all(items)?;
                self.new_list(items)
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                self.new_tuple(items)
            }
            Expr::Set(items) => {
                let items = self.eval_all(items)?;
                self.new_set(items)
            }
            Expr::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    entries.push((key, value));
                }
                self.new_dict(entries)
            }
            Expr::BinOp { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary_op(*op, left, right)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                self.unary_op(*op, operand)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !self.truthy(&left)? {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if self.truthy(&left)? {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Compare { left, ops } => {
                let mut left = self.eval(left)?;
                for (op, right) in ops {
                    let right = self.eval(right)?;
                    if !self.compare_op(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Attribute { value, attr } => {
                let value = self.eval(value)?;
                self.get_attr(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.get_slice(&container, bounds);
                }
                let index = self.eval(index)?;
                self.get_item(&container, &index)
            }
            Expr::Slice { .. } => self.type_error("slice expression outside of a subscript"),
            Expr::IfExp { test, body, orelse } => {
                let test = self.eval(test)?;
                if self.truthy(&test)? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp { elt, generators } => {
                let mut items = Vec::new();
                self.comprehension(generators, &mut |interp: &mut Self| {
                    let item = interp.eval(elt)?;
                    items.push(item);
                    interp.check_len(items.len())
                })?;
                self.new_list(items)
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut pairs = Vec::new();
                self.comprehension(generators, &mut |interp: &mut Self| {
                    let k = interp.eval(key)?;
                    let v = interp.eval(value)?;
                    pairs.push((k, v));
                    interp.check_len(pairs.len())
                })?;
                self.new_dict(pairs)
            }
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr { expr, repr, spec } => {
                            let value = self.eval(expr)?;
                            let value = if *repr {
                                let text = self.repr(&value)?;
                                Value::Str(Rc::from(text))
                            } else {
                                value
                            };
                            let text = match spec {
                                Some(spec) if !spec.is_empty() => self.format_value(&value, spec)?,
                                _ => self.to_str(&value)?,
                            };
                            out.push_str(&text);
                        }
                    }
                }
                Ok(Value::Str(Rc::from(out)))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(expr)?);
        }
        Ok(values)
    }

    /// Comprehension variables are bound in the current scope while the
    /// comprehension runs and restored afterwards.
    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Eval<()>,
    ) -> Eval<()> {
        let mut names = Vec::new();
        for generator in generators {
            collect_names(&generator.target, &mut names);
        }
        let scope = self.frame().scope.clone();
        let saved: Vec<(String, Option<Value>)> = names
            .iter()
            .map(|n| (n.clone(), scope.borrow().get(n).cloned()))
            .collect();

        let result = self.run_generators(generators, emit);

        let mut scope = scope.borrow_mut();
        for (name, old) in saved {
            match old {
                Some(v) => scope.insert(name, v),
                None => scope.remove(&name),
            };
        }
        result
    }

    fn run_generators(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Eval<()>,
    ) -> Eval<()> {
        let Some((generator, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&generator.iter)?;
        let mut it = self.make_iter(&iterable)?;
        while let Some(item) = self.next_item(&mut it) {
            self.poll()?;
            self.assign_comprehension_target(&generator.target, item)?;
            let mut keep = true;
            for cond in &generator.conds {
                let value = self.eval(cond)?;
                if !self.truthy(&value)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                self.run_generators(rest, emit)?;
            }
        }
        Ok(())
    }

    fn assign_comprehension_target(&mut self, target: &Target, value: Value) -> Eval<()> {
        match target {
            Target::Name(name) => {
                self.frame().scope.borrow_mut().insert(name.clone(), value);
                Ok(())
            }
            other => self.assign(other, value),
        }
    }

    // ---- operators --------------------------------------------------------

    pub(crate) fn binary_op(&mut self, op: BinOp, left: Value, right: Value) -> Eval<Value> {
        if let (Some(a), Some(b)) = (int_operand(&left), int_operand(&right)) {
            return self.int_op(op, a, b);
        }
        if let (Some(a), Some(b)) = (float_operand(&left), float_operand(&right)) {
            return self.float_op(op, a, b);
        }

        match (&left, &right, op) {
            (Value::Str(a), Value::Str(b), BinOp::Add) => {
                self.check_len(a.len() + b.len())?;
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                return Ok(Value::Str(Rc::from(s)));
            }
            (Value::Str(s), n, BinOp::Mul) | (n, Value::Str(s), BinOp::Mul) if int_operand(n).is_some() => {
                let times = int_operand(n).unwrap_or(0).max(0) as usize;
                self.check_len(s.len().saturating_mul(times))?;
                return Ok(Value::Str(Rc::from(s.repeat(times))));
            }
            (Value::Str(fmt), args, BinOp::Mod) => {
                let fmt = fmt.clone();
                let text = self.percent_format(&fmt, args)?;
                return Ok(Value::Str(Rc::from(text)));
            }
            _ => {}
        }

        if let (Value::Obj(a), Value::Obj(b)) = (&left, &right) {
            match (self.heap.get(*a), self.heap.get(*b), op) {
                (Object::List(x), Object::List(y), BinOp::Add) => {
                    let joined: Vec<Value> = x.iter().chain(y.iter()).cloned().collect();
                    return self.new_list(joined);
                }
                (Object::Tuple(x), Object::Tuple(y), BinOp::Add) => {
                    let joined: Vec<Value> = x.iter().chain(y.iter()).cloned().collect();
                    return self.new_tuple(joined);
                }
                (Object::Set(x), Object::Set(y), BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor) => {
                    let mut items = SetStore::default();
                    let left_side = x.hashes().filter(|(hash, _)| match op {
                        BinOp::BitAnd => y.contains(hash),
                        BinOp::BitOr => true,
                        _ => !y.contains(hash),
                    });
                    for (hash, value) in left_side {
                        items.insert(hash.clone(), value.clone());
                    }
                    if matches!(op, BinOp::BitOr | BinOp::BitXor) {
                        for (hash, value) in y.hashes() {
                            if op == BinOp::BitOr || !x.contains(hash) {
                                items.insert(hash.clone(), value.clone());
                            }
                        }
                    }
                    self.check_len(items.len())?;
                    return self.alloc(Object::Set(items));
                }
                _ => {}
            }
        }

        if op == BinOp::Mul {
            let (seq, n) = match (&left, &right) {
                (Value::Obj(id), n) | (n, Value::Obj(id)) if int_operand(n).is_some() => {
                    (*id, int_operand(n).unwrap_or(0).max(0) as usize)
                }
                _ => return self.unsupported(op, &left, &right),
            };
            let (items, is_list) = match self.heap.get(seq) {
                Object::List(items) => (items.clone(), true),
                Object::Tuple(items) => (items.clone(), false),
                _ => return self.unsupported(op, &left, &right),
            };
            self.check_len(items.len().saturating_mul(n))?;
            let repeated: Vec<Value> = std::iter::repeat(items).take(n).flatten().collect();
            return if is_list {
                self.new_list(repeated)
            } else {
                self.new_tuple(repeated)
            };
        }

        if let Value::Obj(id) = &left {
            if let Object::Instance { class, .. } = self.heap.get(*id) {
                if let Some(name) = dunder_for(op) {
                    if let Some(method) = self.heap.class_attr(*class, name) {
                        return self.call_value(method, vec![left.clone(), right], Vec::new());
                    }
                }
            }
        }

        self.unsupported(op, &left, &right)
    }

    fn unsupported<T>(&self, op: BinOp, left: &Value, right: &Value) -> Eval<T> {
        self.type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            self.type_name(left),
            self.type_name(right)
        ))
    }

    fn overflow<T>(&self) -> Eval<T> {
        Err(self.error(ExcKind::OverflowError, "integer result does not fit in 64 bits"))
    }

    fn int_op(&self, op: BinOp, a: i64, b: i64) -> Eval<Value> {
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(self.error(ExcKind::ZeroDivisionError, "division by zero"));
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            BinOp::FloorDiv | BinOp::Mod => {
                if b == 0 {
                    return Err(self.error(
                        ExcKind::ZeroDivisionError,
                        "integer division or modulo by zero",
                    ));
                }
                let (Some(q), Some(r)) = (a.checked_div(b), a.checked_rem(b)) else {
                    return self.overflow();
                };
                let adjust = r != 0 && ((r < 0) != (b < 0));
                if op == BinOp::FloorDiv {
                    Some(if adjust { q - 1 } else { q })
                } else {
                    Some(if adjust { r + b } else { r })
                }
            }
            BinOp::Pow => {
                if b < 0 {
                    if a == 0 {
                        return Err(self.error(
                            ExcKind::ZeroDivisionError,
                            "0.0 cannot be raised to a negative power",
                        ));
                    }
                    return Ok(Value::Float((a as f64).powf(b as f64)));
                }
                u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
            }
            BinOp::BitAnd => Some(a & b),
            BinOp::BitOr => Some(a | b),
            BinOp::BitXor => Some(a ^ b),
            BinOp::LShift => {
                if b < 0 {
                    return self.value_error("negative shift count");
                }
                if a == 0 {
                    Some(0)
                } else if b >= 63 {
                    None
                } else {
                    let shifted = a << b;
                    (shifted >> b == a).then_some(shifted)
                }
            }
            BinOp::RShift => {
                if b < 0 {
                    return self.value_error("negative shift count");
                }
                Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
            }
        };
        match result {
            Some(v) => Ok(Value::Int(v)),
            None => self.overflow(),
        }
    }

    fn float_op(&self, op: BinOp, a: f64, b: f64) -> Eval<Value> {
        let zero = |msg: &str| -> Eval<Value> { Err(self.error(ExcKind::ZeroDivisionError, msg)) };
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return zero("float division by zero");
                }
                a / b
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    return zero("float floor division by zero");
                }
                (a / b).floor()
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return zero("float modulo");
                }
                let r = a % b;
                if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                    r + b
                } else {
                    r
                }
            }
            BinOp::Pow => {
                if a == 0.0 && b < 0.0 {
                    return zero("0.0 cannot be raised to a negative power");
                }
                if a < 0.0 && b.fract() != 0.0 {
                    return self.value_error("math domain error");
                }
                let r = a.powf(b);
                if r.is_infinite() && a.is_finite() && b.is_finite() {
                    return Err(self.error(ExcKind::OverflowError, "numerical result out of range"));
                }
                r
            }
            _ => {
                return self.unsupported(op, &Value::Float(a), &Value::Float(b));
            }
        };
        Ok(Value::Float(result))
    }

    fn unary_op(&mut self, op: UnaryOp, operand: Value) -> Eval<Value> {
        match (op, &operand) {
            (UnaryOp::Not, v) => Ok(Value::Bool(!self.truthy(v)?)),
            (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (UnaryOp::Pos, Value::Float(x)) => Ok(Value::Float(*x)),
            (UnaryOp::Neg, v) if v.as_int().is_some() => match v.as_int().and_then(i64::checked_neg) {
                Some(n) => Ok(Value::Int(n)),
                None => self.overflow(),
            },
            (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
            (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or(0))),
            _ => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    UnaryOp::Invert => "~",
                    UnaryOp::Not => "not",
                };
                self.type_error(format!(
                    "bad operand type for unary {}: '{}'",
                    symbol,
                    self.type_name(&operand)
                ))
            }
        }
    }

    fn compare_op(&mut self, op: CmpOp, left: &Value, right: &Value) -> Eval<bool> {
        match op {
            CmpOp::Eq => self.values_equal(left, right),
            CmpOp::NotEq => Ok(!self.values_equal(left, right)?),
            CmpOp::Is => Ok(is_same(left, right)),
            CmpOp::IsNot => Ok(!is_same(left, right)),
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                let ordering = self.order(left, right, op)?;
                Ok(match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::LtE => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
        }
    }

    pub(crate) fn values_equal(&mut self, left: &Value, right: &Value) -> Eval<bool> {
        if let Value::Obj(id) = left {
            if let Object::Instance { class, .. } = self.heap.get(*id) {
                if let Some(method) = self.heap.class_attr(*class, "__eq__") {
                    let result = self.call_value(method, vec![left.clone(), right.clone()], Vec::new())?;
                    return Ok(self.heap.truthy(&result));
                }
            }
        }
        Ok(self.heap.equals(left, right))
    }

    pub(crate) fn order(&mut self, left: &Value, right: &Value, op: CmpOp) -> Eval<std::cmp::Ordering> {
        if let Some(ordering) = self.heap.compare(left, right) {
            return Ok(ordering);
        }
        if let Value::Obj(id) = left {
            if let Object::Instance { class, .. } = self.heap.get(*id) {
                if let Some(method) = self.heap.class_attr(*class, "__lt__") {
                    let less = self.call_value(method.clone(), vec![left.clone(), right.clone()], Vec::new())?;
                    if self.heap.truthy(&less) {
                        return Ok(std::cmp::Ordering::Less);
                    }
                    let greater = self.call_value(method, vec![right.clone(), left.clone()], Vec::new())?;
                    return Ok(if self.heap.truthy(&greater) {
                        std::cmp::Ordering::Greater
                    } else {
                        std::cmp::Ordering::Equal
                    });
                }
            }
        }
        let symbol = match op {
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            _ => ">=",
        };
        self.type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            self.type_name(left),
            self.type_name(right)
        ))
    }

    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> Eval<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => self.type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    self.type_name(other)
                )),
            },
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(items) | Object::Tuple(items) => {
                    Ok(items.iter().any(|v| self.heap.equals(v, item)))
                }
                Object::Set(items) => Ok(items.contains(&self.hash_key(item)?)),
                Object::Dict(pairs) => Ok(pairs.contains(&self.hash_key(item)?)),
                Object::Range { start, stop, step } => {
                    let Some(n) = item.as_int() else { return Ok(false) };
                    let in_bounds = if *step > 0 {
                        n >= *start && n < *stop
                    } else {
                        n <= *start && n > *stop
                    };
                    Ok(in_bounds && (n as i128 - *start as i128) % *step as i128 == 0)
                }
                _ => self.type_error(format!(
                    "argument of type '{}' is not iterable",
                    self.type_name(container)
                )),
            },
            _ => self.type_error(format!(
                "argument of type '{}' is not iterable",
                self.type_name(container)
            )),
        }
    }

    // ---- calls ------------------------------------------------------------

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Eval<Value> {
        if let Expr::Attribute { value, attr } = func {
            let receiver = self.eval(value)?;
            let args = self.eval_all(args)?;
            let kwargs = self.eval_kwargs(kwargs)?;
            return self.call_method(receiver, attr, args, kwargs);
        }
        let callee = self.eval(func)?;
        let args = self.eval_all(args)?;
        let kwargs = self.eval_kwargs(kwargs)?;
        self.call_value(callee, args, kwargs)
    }

    fn eval_kwargs(&mut self, kwargs: &[(String, Expr)]) -> Eval<Vec<(String, Value)>> {
        let mut values = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            values.push((name.clone(), self.eval(expr)?));
        }
        Ok(values)
    }

    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        match &callee {
            Value::Builtin(Builtin::Function(f)) => self.call_builtin(*f, args, kwargs),
            Value::Builtin(Builtin::Type(t)) => self.construct(*t, args, kwargs),
            Value::Builtin(Builtin::Exception(kind)) => {
                let message = self.exception_message(&args)?;
                self.alloc(Object::Exception {
                    kind: *kind,
                    message: Rc::from(message),
                })
            }
            Value::Obj(id) => match self.heap.get(*id) {
                Object::Function(_) => self.call_function(*id, args, kwargs),
                Object::Class(_) => self.instantiate(*id, args, kwargs),
                Object::BoundMethod { receiver, method } => match (receiver.clone(), method.clone()) {
                    (receiver, Method::User(function)) => {
                        let mut full = Vec::with_capacity(args.len() + 1);
                        full.push(receiver);
                        full.extend(args);
                        self.call_function(function, full, kwargs)
                    }
                    (receiver, Method::Native(name)) => self.call_native(receiver, name, args, kwargs),
                },
                _ => self.not_callable(&callee),
            },
            _ => self.not_callable(&callee),
        }
    }

    fn not_callable<T>(&self, value: &Value) -> Eval<T> {
        self.type_error(format!("'{}' object is not callable", self.type_name(value)))
    }

    pub(crate) fn exception_message(&mut self, args: &[Value]) -> Eval<String> {
        match args {
            [] => Ok(String::new()),
            [single] => self.to_str(single),
            many => {
                let tuple = self.new_tuple(many.to_vec())?;
                self.repr(&tuple)
            }
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if let Value::Obj(id) = &receiver {
            match self.heap.get(*id) {
                Object::Instance { class, attrs, .. } => {
                    let class = *class;
                    if let Some(v) = attrs.get(name).cloned() {
                        return self.call_value(v, args, kwargs);
                    }
                    if let Some(v) = self.heap.class_attr(class, name) {
                        return self.call_attribute(v, receiver, args, kwargs);
                    }
                }
                Object::Super { class, receiver } => {
                    let (class, receiver) = (*class, receiver.clone());
                    return self.call_super(class, receiver, name, args, kwargs);
                }
                _ => {}
            }
        }
        if let Some(method) = self.native_method_name(&receiver, name) {
            return self.call_native(receiver, method, args, kwargs);
        }
        let attr = self.get_attr(&receiver, name)?;
        self.call_value(attr, args, kwargs)
    }

    /// Call a class attribute on behalf of `receiver`, binding it when it is a function.
    fn call_attribute(
        &mut self,
        attr: Value,
        receiver: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if let Value::Obj(fid) = &attr {
            if matches!(self.heap.get(*fid), Object::Function(_)) {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver);
                full.extend(args);
                return self.call_function(*fid, full, kwargs);
            }
        }
        self.call_value(attr, args, kwargs)
    }

    fn call_super(
        &mut self,
        class: ObjId,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let base = match self.heap.get(class) {
            Object::Class(c) => c.base.clone(),
            _ => None,
        };
        match base {
            Some(Value::Obj(parent)) => match self.heap.class_attr(parent, name) {
                Some(attr) => self.call_attribute(attr, receiver, args, kwargs),
                None if name == "__init__" => self.default_init(parent, &receiver, &args),
                None => Err(self.error(
                    ExcKind::AttributeError,
                    format!("'super' object has no attribute '{}'", name),
                )),
            },
            Some(Value::Builtin(Builtin::Exception(_))) | None if name == "__init__" => {
                self.default_init(class, &receiver, &args)
            }
            _ => Err(self.error(
                ExcKind::AttributeError,
                format!("'super' object has no attribute '{}'", name),
            )),
        }
    }

    /// `object.__init__` or `Exception.__init__` applied to `receiver`.
    fn default_init(&mut self, class: ObjId, receiver: &Value, args: &[Value]) -> Eval<Value> {
        if self.heap.exception_root(class).is_some() {
            let message = self.exception_message(args)?;
            if let Some(Object::Instance { exc_message, .. }) = receiver.as_obj().map(|id| self.heap.get_mut(id)) {
                *exc_message = Some(Rc::from(message));
            }
            return Ok(Value::None);
        }
        if !args.is_empty() {
            return self.type_error("object.__init__() takes exactly one argument (the instance to initialize)");
        }
        Ok(Value::None)
    }

    fn instantiate(&mut self, class: ObjId, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval<Value> {
        // Exception instances keep their constructor arguments even when a
        // custom __init__ never calls the base initializer.
        let exc_message = match self.heap.exception_root(class) {
            Some(_) => Some(Rc::from(self.exception_message(&args)?)),
            None => None,
        };
        let is_exception = exc_message.is_some();
        let instance = self.alloc(Object::Instance {
            class,
            attrs: Default::default(),
            exc_message,
        })?;
        match self.heap.class_attr(class, "__init__") {
            Some(init) => {
                self.call_attribute(init, instance.clone(), args, kwargs)?;
            }
            None if is_exception => {}
            None if !args.is_empty() || !kwargs.is_empty() => {
                return self.type_error(format!("{}() takes no arguments", self.heap.class_name(class)));
            }
            None => {}
        }
        Ok(instance)
    }

    pub(crate) fn call_function(
        &mut self,
        function: ObjId,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let Object::Function(func) = self.heap.get(function).clone() else {
            return self.not_callable(&Value::Obj(function));
        };
        let def = func.def.clone();
        if self.frames.len() > self.limits.max_call_depth {
            return Err(self.error(ExcKind::RecursionError, "maximum recursion depth exceeded"));
        }

        let params = &def.params;
        if args.len() > params.len() {
            return self.type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            ));
        }
        let mut slots: Vec<Option<Value>> = params.iter().map(|_| None).collect();
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for (name, value) in kwargs {
            let Some(index) = params.iter().position(|p| p.name == name) else {
                return self.type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                ));
            };
            if slots[index].is_some() {
                return self.type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                ));
            }
            slots[index] = Some(value);
        }
        let first_default = params.len() - func.defaults.len();
        let mut scope = Scope::new();
        let mut missing = Vec::new();
        for (index, (param, slot)) in params.iter().zip(slots).enumerate() {
            let value = match slot {
                Some(v) => v,
                None if index >= first_default => func.defaults[index - first_default].clone(),
                None => {
                    missing.push(format!("'{}'", param.name));
                    continue;
                }
            };
            scope.insert(param.name.clone(), value);
        }
        if !missing.is_empty() {
            return self.type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                def.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(" and ")
            ));
        }

        let super_context = func
            .owner
            .zip(params.first().map(|p| p.name.clone()));
        self.frames.push(FrameState {
            name: Rc::from(def.name.as_str()),
            line: def.line,
            scope: Rc::new(RefCell::new(scope)),
            kind: FrameKind::Function,
            closure: func.closure.clone(),
            global_names: Vec::new(),
            super_context,
            function: Some(def.clone()),
        });
        let result = self.exec_block(&def.body);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    /// Zero-argument `super()` inside a method.
    pub(crate) fn make_super(&mut self) -> Eval<Value> {
        let Some((class, first)) = self.frame().super_context.clone() else {
            return Err(self.error(ExcKind::RuntimeError, "super(): no arguments"));
        };
        let receiver = self.lookup(&first)?;
        self.alloc(Object::Super { class, receiver })
    }

    // ---- attributes -------------------------------------------------------

    pub(crate) fn get_attr(&mut self, value: &Value, name: &str) -> Eval<Value> {
        if let Value::Obj(id) = value {
            let id = *id;
            match self.heap.get(id) {
                Object::Instance {
                    class,
                    attrs,
                    exc_message,
                } => {
                    let class = *class;
                    if let Some(v) = attrs.get(name) {
                        return Ok(v.clone());
                    }
                    if name == "__class__" {
                        return Ok(Value::Obj(class));
                    }
                    if name == "args" && self.heap.exception_root(class).is_some() {
                        let args = match exc_message {
                            Some(m) if !m.is_empty() => vec![Value::Str(m.clone())],
                            _ => Vec::new(),
                        };
                        return self.new_tuple(args);
                    }
                    if let Some(v) = self.heap.class_attr(class, name) {
                        return self.bind(v, value.clone());
                    }
                }
                Object::Class(class) => {
                    if name == "__name__" {
                        return Ok(Value::str(&class.name));
                    }
                    if let Some(v) = self.heap.class_attr(id, name) {
                        return Ok(v);
                    }
                }
                Object::Function(f) if name == "__name__" => return Ok(Value::str(&f.def.name)),
                Object::Exception { message, .. } if name == "args" => {
                    let args = if message.is_empty() {
                        Vec::new()
                    } else {
                        vec![Value::Str(message.clone())]
                    };
                    return self.new_tuple(args);
                }
                Object::Super { class, receiver } => {
                    let receiver = receiver.clone();
                    let base = match self.heap.get(*class) {
                        Object::Class(c) => c.base.as_ref().and_then(Value::as_obj),
                        _ => None,
                    };
                    if let Some(v) = base.and_then(|b| self.heap.class_attr(b, name)) {
                        return self.bind(v, receiver);
                    }
                }
                _ => {}
            }
        }
        if name == "__name__" {
            if let Value::Builtin(b) = value {
                let name = match b {
                    Builtin::Function(f) => f.name(),
                    Builtin::Type(t) => t.name(),
                    Builtin::Exception(k) => k.name(),
                };
                return Ok(Value::str(name));
            }
        }
        if let Some(method) = self.native_method_name(value, name) {
            return self.alloc(Object::BoundMethod {
                receiver: value.clone(),
                method: Method::Native(method),
            });
        }
        Err(self.error(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", self.type_name(value), name),
        ))
    }

    /// Functions found on a class become bound methods of `receiver`.
    fn bind(&mut self, attr: Value, receiver: Value) -> Eval<Value> {
        if let Value::Obj(fid) = &attr {
            if matches!(self.heap.get(*fid), Object::Function(_)) {
                return self.alloc(Object::BoundMethod {
                    receiver,
                    method: Method::User(*fid),
                });
            }
        }
        Ok(attr)
    }

    fn set_attr(&mut self, target: &Value, name: &str, value: Value) -> Eval<()> {
        match target.as_obj().map(|id| self.heap.get_mut(id)) {
            Some(Object::Instance { attrs, .. }) => {
                attrs.insert(name.to_string(), value);
                Ok(())
            }
            Some(Object::Class(class)) => {
                class.attrs.insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(self.error(
                ExcKind::AttributeError,
                format!(
                    "'{}' object has no attribute '{}'",
                    self.type_name(target),
                    name
                ),
            )),
        }
    }

    // ---- subscripts -------------------------------------------------------

    fn index_of(&self, index: &Value, len: usize, what: &str) -> Eval<usize> {
        let Some(i) = index.as_int() else {
            return self.type_error(format!(
                "{} indices must be integers or slices, not {}",
                what,
                self.type_name(index)
            ));
        };
        let len = len as i64;
        let normalized = if i < 0 { i + len } else { i };
        if normalized < 0 || normalized >= len {
            return Err(self.error(ExcKind::IndexError, format!("{} index out of range", what)));
        }
        Ok(normalized as usize)
    }

    pub(crate) fn get_item(&mut self, container: &Value, index: &Value) -> Eval<Value> {
        match container {
            Value::Str(s) => {
                let len = s.chars().count();
                let i = self.index_of(index, len, "string")?;
                Ok(s.chars().nth(i).map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).unwrap_or(Value::None))
            }
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(items) => {
                    let i = self.index_of(index, items.len(), "list")?;
                    Ok(items[i].clone())
                }
                Object::Tuple(items) => {
                    let i = self.index_of(index, items.len(), "tuple")?;
                    Ok(items[i].clone())
                }
                Object::Range { start, stop, step } => {
                    let len = range_len(*start, *stop, *step) as usize;
                    let (start, step) = (*start, *step);
                    let i = self.index_of(index, len, "range object")?;
                    Ok(Value::Int(start + step * i as i64))
                }
                Object::Dict(pairs) => {
                    if let Some(v) = pairs.get(&self.hash_key(index)?) {
                        return Ok(v.clone());
                    }
                    let key = self.repr(index)?;
                    Err(self.error(ExcKind::KeyError, key))
                }
                Object::Instance { class, .. } => match self.heap.class_attr(*class, "__getitem__") {
                    Some(method) => self.call_value(method, vec![container.clone(), index.clone()], Vec::new()),
                    None => self.not_subscriptable(container),
                },
                _ => self.not_subscriptable(container),
            },
            _ => self.not_subscriptable(container),
        }
    }

    fn not_subscriptable<T>(&self, value: &Value) -> Eval<T> {
        self.type_error(format!("'{}' object is not subscriptable", self.type_name(value)))
    }

    fn set_item(&mut self, container: &Value, index: Value, value: Value) -> Eval<()> {
        let Some(id) = container.as_obj() else {
            return self.type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name(container)
            ));
        };
        match self.heap.get(id) {
            Object::List(items) => {
                let i = self.index_of(&index, items.len(), "list")?;
                if let Object::List(items) = self.heap.get_mut(id) {
                    items[i] = value;
                }
                Ok(())
            }
            Object::Dict(pairs) => {
                let hash = self.hash_key(&index)?;
                if !pairs.contains(&hash) {
                    self.check_len(pairs.len() + 1)?;
                }
                if let Object::Dict(pairs) = self.heap.get_mut(id) {
                    pairs.insert(hash, index, value);
                }
                Ok(())
            }
            Object::Instance { class, .. } => match self.heap.class_attr(*class, "__setitem__") {
                Some(method) => {
                    self.call_value(method, vec![container.clone(), index, value], Vec::new())?;
                    Ok(())
                }
                None => self.type_error(format!(
                    "'{}' object does not support item assignment",
                    self.type_name(container)
                )),
            },
            _ => self.type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name(container)
            )),
        }
    }

    fn delete_item(&mut self, container: &Value, index: &Value) -> Eval<()> {
        let Some(id) = container.as_obj() else {
            return self.type_error(format!(
                "'{}' object does not support item deletion",
                self.type_name(container)
            ));
        };
        match self.heap.get(id) {
            Object::List(items) => {
                let i = self.index_of(index, items.len(), "list")?;
                if let Object::List(items) = self.heap.get_mut(id) {
                    items.remove(i);
                }
                Ok(())
            }
            Object::Dict(_) => {
                let hash = self.hash_key(index)?;
                let removed = match self.heap.get_mut(id) {
                    Object::Dict(pairs) => pairs.remove(&hash),
                    _ => None,
                };
                if removed.is_some() {
                    return Ok(());
                }
                let key = self.repr(index)?;
                Err(self.error(ExcKind::KeyError, key))
            }
            _ => self.type_error(format!(
                "'{}' object does not support item deletion",
                self.type_name(container)
            )),
        }
    }

    fn slice_bounds(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> Eval<SliceBounds> {
        let bound = |interp: &mut Self, e: &Option<Box<Expr>>| -> Eval<Option<i64>> {
            match e {
                None => Ok(None),
                Some(e) => match interp.eval(e)? {
                    Value::None => Ok(None),
                    v => match v.as_int() {
                        Some(i) => Ok(Some(i)),
                        None => interp.type_error("slice indices must be integers or None"),
                    },
                },
            }
        };
        let lower = bound(self, lower)?;
        let upper = bound(self, upper)?;
        let step = bound(self, step)?;
        if step == Some(0) {
            return self.value_error("slice step cannot be zero");
        }
        Ok(SliceBounds { lower, upper, step })
    }

    fn get_slice(&mut self, container: &Value, bounds: SliceBounds) -> Eval<Value> {
        match container {
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let text: String = bounds.indices(chars.len()).into_iter().map(|i| chars[i]).collect();
                Ok(Value::Str(Rc::from(text)))
            }
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(items) => {
                    let picked = bounds.indices(items.len()).into_iter().map(|i| items[i].clone()).collect();
                    self.new_list(picked)
                }
                Object::Tuple(items) => {
                    let picked = bounds.indices(items.len()).into_iter().map(|i| items[i].clone()).collect();
                    self.new_tuple(picked)
                }
                Object::Range { start, stop, step } => {
                    let (start, step) = (*start, *step);
                    let len = range_len(start, *stop, step) as usize;
                    self.check_len(len)?;
                    let picked = bounds
                        .indices(len)
                        .into_iter()
                        .map(|i| Value::Int(start + step * i as i64))
                        .collect();
                    self.new_list(picked)
                }
                _ => self.not_subscriptable(container),
            },
            _ => self.not_subscriptable(container),
        }
    }

    fn set_slice(&mut self, container: &Value, bounds: SliceBounds, value: Value) -> Eval<()> {
        let replacement = self.iterate(&value)?;
        let Some(Object::List(items)) = container.as_obj().map(|id| self.heap.get(id)) else {
            return self.type_error(format!(
                "'{}' object does not support slice assignment",
                self.type_name(container)
            ));
        };
        let len = items.len();
        let indices = bounds.indices(len);
        let contiguous = bounds.step.unwrap_or(1) == 1;
        if !contiguous && indices.len() != replacement.len() {
            return self.value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                indices.len()
            ));
        }
        if contiguous {
            self.check_len(len - indices.len() + replacement.len())?;
        }
        let start = bounds.clamped_start(len);
        if let Some(Object::List(items)) = container.as_obj().map(|id| self.heap.get_mut(id)) {
            if contiguous {
                let end = indices.last().map(|i| i + 1).unwrap_or(start);
                items.splice(start..end.max(start), replacement);
            } else {
                for (i, v) in indices.into_iter().zip(replacement) {
                    items[i] = v;
                }
            }
        }
        Ok(())
    }

    fn delete_slice(&mut self, container: &Value, bounds: SliceBounds) -> Eval<()> {
        let Some(Object::List(items)) = container.as_obj().map(|id| self.heap.get_mut(id)) else {
            return self.type_error(format!(
                "'{}' object does not support item deletion",
                self.type_name(container)
            ));
        };
        let mut doomed = bounds.indices(items.len());
        doomed.sort_unstable();
        for i in doomed.into_iter().rev() {
            items.remove(i);
        }
        Ok(())
    }

    // ---- iteration --------------------------------------------------------

    pub(crate) fn make_iter(&mut self, value: &Value) -> Eval<PyIter> {
        match value {
            Value::Str(s) => Ok(PyIter::Items {
                items: s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(),
                index: 0,
            }),
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(_) => Ok(PyIter::List { id: *id, index: 0 }),
                Object::Tuple(items) => Ok(PyIter::Items {
                    items: items.clone(),
                    index: 0,
                }),
                Object::Set(items) => Ok(PyIter::Items {
                    items: items.to_vec(),
                    index: 0,
                }),
                Object::Dict(pairs) => Ok(PyIter::Items {
                    items: pairs.keys().cloned().collect(),
                    index: 0,
                }),
                Object::Range { start, stop, step } => Ok(PyIter::Range {
                    next: *start,
                    stop: *stop,
                    step: *step,
                }),
                _ => self.not_iterable(value),
            },
            _ => self.not_iterable(value),
        }
    }

    fn not_iterable<T>(&self, value: &Value) -> Eval<T> {
        self.type_error(format!("'{}' object is not iterable", self.type_name(value)))
    }

    pub(crate) fn next_item(&self, it: &mut PyIter) -> Option<Value> {
        match it {
            PyIter::Range { next, stop, step } => {
                let live = if *step > 0 { *next < *stop } else { *next > *stop };
                if !live {
                    return None;
                }
                let current = *next;
                match next.checked_add(*step) {
                    Some(n) => *next = n,
                    None => *next = *stop,
                }
                Some(Value::Int(current))
            }
            PyIter::List { id, index } => match self.heap.get(*id) {
                Object::List(items) => {
                    let item = items.get(*index).cloned();
                    *index += 1;
                    item
                }
                _ => None,
            },
            PyIter::Items { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
        }
    }

    /// Materialize an iterable, bounded by the collection limit.
    pub(crate) fn iterate(&mut self, value: &Value) -> Eval<Vec<Value>> {
        if let Some(Object::Range { start, stop, step }) = value.as_obj().map(|id| self.heap.get(id)) {
            self.check_len(range_len(*start, *stop, *step) as usize)?;
        }
        let mut it = self.make_iter(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_item(&mut it) {
            items.push(item);
            if items.len() % POLL_INTERVAL == 0 {
                self.check_len(items.len())?;
                self.poll()?;
            }
        }
        Ok(items)
    }

    // ---- text conversion --------------------------------------------------

    /// `str(value)`
    pub(crate) fn to_str(&mut self, value: &Value) -> Eval<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Obj(id) => match self.heap.get(*id) {
                Object::Exception { message, .. } => Ok(message.to_string()),
                Object::Instance {
                    class, exc_message, ..
                } => {
                    let (class, exc_message) = (*class, exc_message.clone());
                    if let Some(method) = self.heap.class_attr(class, "__str__") {
                        return self.call_dunder_str(method, value, "__str__");
                    }
                    if self.heap.exception_root(class).is_some() && self.heap.class_attr(class, "__repr__").is_none() {
                        return Ok(exc_message.map(|m| m.to_string()).unwrap_or_default());
                    }
                    self.repr(value)
                }
                _ => self.repr(value),
            },
            other => self.repr(other),
        }
    }

    fn call_dunder_str(&mut self, method: Value, value: &Value, name: &str) -> Eval<String> {
        match self.call_attribute(method, value.clone(), Vec::new(), Vec::new())? {
            Value::Str(s) => Ok(s.to_string()),
            other => self.type_error(format!(
                "{} returned non-string (type {})",
                name,
                self.type_name(&other)
            )),
        }
    }

    /// `repr(value)`
    pub(crate) fn repr(&mut self, value: &Value) -> Eval<String> {
        let mut active = Vec::new();
        self.repr_inner(value, &mut active)
    }

    fn repr_inner(&mut self, value: &Value, active: &mut Vec<ObjId>) -> Eval<String> {
        let id = match value {
            Value::None => return Ok("None".to_string()),
            Value::Bool(true) => return Ok("True".to_string()),
            Value::Bool(false) => return Ok("False".to_string()),
            Value::Int(i) => return Ok(i.to_string()),
            Value::Float(x) => return Ok(format_float(*x)),
            Value::Str(s) => return Ok(quote_str(s)),
            Value::Builtin(_) => return Ok(self.heap.describe_opaque(value)),
            Value::Obj(id) => *id,
        };
        let object = self.heap.get(id).clone();
        let (open, close) = match &object {
            Object::List(_) => ("[", "]"),
            Object::Tuple(_) => ("(", ")"),
            Object::Dict(_) | Object::Set(_) => ("{", "}"),
            Object::Instance {
                class, exc_message, ..
            } => {
                if let Some(method) = self.heap.class_attr(*class, "__repr__") {
                    return self.call_dunder_str(method, value, "__repr__");
                }
                let name = self.heap.class_name(*class).to_string();
                if self.heap.exception_root(*class).is_some() {
                    let message = exc_message.as_deref().map(quote_str).unwrap_or_default();
                    return Ok(format!("{}({})", name, message));
                }
                return Ok(format!("<__main__.{} object at 0x{:04x}>", name, id.serial()));
            }
            _ => return Ok(self.heap.describe_opaque(value)),
        };
        if active.contains(&id) {
            return Ok(format!("{}...{}", open, close));
        }
        active.push(id);
        let parts = self.repr_parts(&object, active);
        active.pop();
        let parts = parts?;
        Ok(match &object {
            Object::Tuple(_) if parts.len() == 1 => format!("({},)", parts[0]),
            Object::Set(_) if parts.is_empty() => "set()".to_string(),
            _ => format!("{}{}{}", open, parts.join(", "), close),
        })
    }

    fn repr_parts(&mut self, object: &Object, active: &mut Vec<ObjId>) -> Eval<Vec<String>> {
        let mut parts = Vec::new();
        match object {
            Object::List(items) | Object::Tuple(items) => {
                for item in items {
                    parts.push(self.repr_inner(item, active)?);
                }
            }
            Object::Set(items) => {
                for item in items.iter() {
                    parts.push(self.repr_inner(item, active)?);
                }
            }
            Object::Dict(pairs) => {
                for (k, v) in pairs.iter() {
                    let k = self.repr_inner(k, active)?;
                    let v = self.repr_inner(v, active)?;
                    parts.push(format!("{}: {}", k, v));
                }
            }
            _ => {}
        }
        Ok(parts)
    }
}

/// Normalized slice bounds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceBounds {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceBounds {
    pub(crate) fn indices(&self, len: usize) -> Vec<usize> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        let mut out = Vec::new();
        if step > 0 {
            let clamp = |v: i64| if v < 0 { (v + len).max(0) } else { v.min(len) };
            let start = self.lower.map(clamp).unwrap_or(0);
            let stop = self.upper.map(clamp).unwrap_or(len);
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let clamp = |v: i64| if v < 0 { (v + len).max(-1) } else { v.min(len - 1) };
            let start = self.lower.map(clamp).unwrap_or(len - 1);
            let stop = self.upper.map(clamp).unwrap_or(-1);
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        out
    }

    fn clamped_start(&self, len: usize) -> usize {
        let len = len as i64;
        match self.lower {
            None => 0,
            Some(v) if v < 0 => (v + len).max(0) as usize,
            Some(v) => v.min(len) as usize,
        }
    }
}

fn int_operand(value: &Value) -> Option<i64> {
    value.as_int()
}

fn float_operand(value: &Value) -> Option<f64> {
    match value {
        Value::Float(_) | Value::Int(_) | Value::Bool(_) => value.as_float(),
        _ => None,
    }
}

fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => false,
    }
}

fn dunder_for(op: BinOp) -> Option<&'static str> {
    Some(match op {
        BinOp::Add => "__add__",
        BinOp::Sub => "__sub__",
        BinOp::Mul => "__mul__",
        BinOp::Div => "__truediv__",
        BinOp::FloorDiv => "__floordiv__",
        BinOp::Mod => "__mod__",
        _ => return None,
    })
}

fn collect_names(target: &Target, out: &mut Vec<String>) {
    match target {
        Target::Name(name) => out.push(name.clone()),
        Target::Unpack(targets) => targets.iter().for_each(|t| collect_names(t, out)),
        _ => {}
    }
}
