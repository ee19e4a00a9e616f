//! Runtime values and the object arena of the traced evaluator.
//!
//! Composite objects live in a [`Heap`] arena and are referenced by
//! [`ObjId`]. Ids are handed out sequentially and never reused within a run,
//! which gives every object a stable, deterministic identity.

use crate::runtime::ast::FunctionDef;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Identity of an object in the arena. Only the arena creates ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(usize);

impl ObjId {
    /// Allocation serial number, starting at 1.
    pub fn serial(self) -> usize {
        self.0 + 1
    }
}

pub type Scope = BTreeMap<String, Value>;
pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Obj(ObjId),
    Builtin(Builtin),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Obj(_) | Value::Builtin(_))
    }

    pub fn as_obj(&self) -> Option<ObjId> {
        match self {
            Value::Obj(id) => Some(*id),
            _ => None,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of every numeric value.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            other => other.as_int().map(|i| i as f64),
        }
    }
}

/// Values provided by the restricted symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Function(BuiltinFn),
    Type(TypeName),
    Exception(ExcKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    Print,
    Len,
    Sum,
    Max,
    Min,
    Abs,
    Round,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Isinstance,
    Repr,
    Any,
    All,
    Divmod,
    Pow,
    Ord,
    Chr,
    Map,
    Filter,
    Super,
}

impl BuiltinFn {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFn::Print => "print",
            BuiltinFn::Len => "len",
            BuiltinFn::Sum => "sum",
            BuiltinFn::Max => "max",
            BuiltinFn::Min => "min",
            BuiltinFn::Abs => "abs",
            BuiltinFn::Round => "round",
            BuiltinFn::Sorted => "sorted",
            BuiltinFn::Reversed => "reversed",
            BuiltinFn::Enumerate => "enumerate",
            BuiltinFn::Zip => "zip",
            BuiltinFn::Isinstance => "isinstance",
            BuiltinFn::Repr => "repr",
            BuiltinFn::Any => "any",
            BuiltinFn::All => "all",
            BuiltinFn::Divmod => "divmod",
            BuiltinFn::Pow => "pow",
            BuiltinFn::Ord => "ord",
            BuiltinFn::Chr => "chr",
            BuiltinFn::Map => "map",
            BuiltinFn::Filter => "filter",
            BuiltinFn::Super => "super",
        }
    }
}

/// Built-in types. The first group is callable as a constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeName {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Tuple,
    Set,
    Range,
    Type,
    Object,
    NoneType,
    Function,
    Method,
    BuiltinFunction,
}

impl TypeName {
    pub fn name(self) -> &'static str {
        match self {
            TypeName::Int => "int",
            TypeName::Float => "float",
            TypeName::Str => "str",
            TypeName::Bool => "bool",
            TypeName::List => "list",
            TypeName::Dict => "dict",
            TypeName::Tuple => "tuple",
            TypeName::Set => "set",
            TypeName::Range => "range",
            TypeName::Type => "type",
            TypeName::Object => "object",
            TypeName::NoneType => "NoneType",
            TypeName::Function => "function",
            TypeName::Method => "method",
            TypeName::BuiltinFunction => "builtin_function_or_method",
        }
    }
}

/// Built-in exception hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    Exception,
    ArithmeticError,
    LookupError,
    ValueError,
    TypeError,
    IndexError,
    KeyError,
    ZeroDivisionError,
    OverflowError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    NameError,
    UnboundLocalError,
    AttributeError,
    AssertionError,
    ImportError,
    MemoryError,
    StopIteration,
}

impl ExcKind {
    pub const ALL: [ExcKind; 19] = [
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::LookupError,
        ExcKind::ValueError,
        ExcKind::TypeError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::RuntimeError,
        ExcKind::RecursionError,
        ExcKind::NotImplementedError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::AttributeError,
        ExcKind::AssertionError,
        ExcKind::ImportError,
        ExcKind::MemoryError,
        ExcKind::StopIteration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::LookupError => "LookupError",
            ExcKind::ValueError => "ValueError",
            ExcKind::TypeError => "TypeError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::ImportError => "ImportError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::StopIteration => "StopIteration",
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        match self {
            ExcKind::Exception => None,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => Some(ExcKind::ArithmeticError),
            ExcKind::IndexError | ExcKind::KeyError => Some(ExcKind::LookupError),
            ExcKind::RecursionError | ExcKind::NotImplementedError => Some(ExcKind::RuntimeError),
            ExcKind::UnboundLocalError => Some(ExcKind::NameError),
            _ => Some(ExcKind::Exception),
        }
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
    /// Scopes of the enclosing functions, innermost first
    pub closure: Vec<ScopeRef>,
    /// Class whose body defined this function; used by `super()`
    pub owner: Option<ObjId>,
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    /// A user class, a built-in exception, or `None` for `object`
    pub base: Option<Value>,
    pub attrs: BTreeMap<String, Value>,
}

/// Callable half of a bound method.
#[derive(Debug, Clone)]
pub enum Method {
    User(ObjId),
    Native(&'static str),
}

/// Hash identity of a hashable value. Values that compare equal map to the
/// same key: `1`, `1.0` and `True` share `Int(1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    /// Bit pattern of a non-integral float
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Builtin(Builtin),
    /// Objects that only equal themselves
    Identity(ObjId),
}

/// Insertion-ordered mapping. The first key stored for a hash is kept when
/// its value is overwritten.
#[derive(Debug, Clone, Default)]
pub struct DictStore {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl DictStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.values().map(|(k, _)| k)
    }

    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }

    pub fn get(&self, hash: &HashKey) -> Option<&Value> {
        self.entries.get(hash).map(|(_, v)| v)
    }

    pub fn contains(&self, hash: &HashKey) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        match self.entries.get_mut(&hash) {
            Some(slot) => slot.1 = value,
            None => {
                self.entries.insert(hash, (key, value));
            }
        }
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(hash)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, pair)| pair)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Insertion-ordered set of hashable values.
#[derive(Debug, Clone, Default)]
pub struct SetStore {
    items: IndexMap<HashKey, Value>,
}

impl SetStore {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.values()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.values().cloned().collect()
    }

    pub fn hashes(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.items.iter()
    }

    pub fn contains(&self, hash: &HashKey) -> bool {
        self.items.contains_key(hash)
    }

    /// Returns false when an equal value was already present.
    pub fn insert(&mut self, hash: HashKey, value: Value) -> bool {
        if self.items.contains_key(&hash) {
            return false;
        }
        self.items.insert(hash, value);
        true
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<Value> {
        self.items.shift_remove(hash)
    }

    pub fn pop_first(&mut self) -> Option<Value> {
        self.items.shift_remove_index(0).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Debug, Clone)]
pub enum Object {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(DictStore),
    Set(SetStore),
    Instance {
        class: ObjId,
        attrs: BTreeMap<String, Value>,
        /// Message of instances of exception subclasses
        exc_message: Option<Rc<str>>,
    },
    Function(Function),
    Class(Class),
    BoundMethod {
        receiver: Value,
        method: Method,
    },
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Exception {
        kind: ExcKind,
        message: Rc<str>,
    },
    /// Result of `super()`: attribute lookup starts above `class`
    Super {
        class: ObjId,
        receiver: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapExhausted {
    pub limit: usize,
}

impl fmt::Display for HeapExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object limit of {} exceeded", self.limit)
    }
}

/// Append-only object arena.
#[derive(Debug)]
pub struct Heap {
    objects: Vec<Object>,
    limit: usize,
}

impl Heap {
    pub fn new(limit: usize) -> Self {
        Self {
            objects: Vec::new(),
            limit,
        }
    }

    pub fn alloc(&mut self, object: Object) -> Result<ObjId, HeapExhausted> {
        if self.objects.len() >= self.limit {
            return Err(HeapExhausted { limit: self.limit });
        }
        self.objects.push(object);
        Ok(ObjId(self.objects.len() - 1))
    }

    pub fn get(&self, id: ObjId) -> &Object {
        &self.objects[id.0]
    }

    pub fn get_mut(&mut self, id: ObjId) -> &mut Object {
        &mut self.objects[id.0]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn type_name(&self, value: &Value) -> String {
        match value {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Builtin(Builtin::Function(_)) => "builtin_function_or_method".to_string(),
            Value::Builtin(_) => "type".to_string(),
            Value::Obj(id) => match self.get(*id) {
                Object::List(_) => "list".to_string(),
                Object::Tuple(_) => "tuple".to_string(),
                Object::Dict(_) => "dict".to_string(),
                Object::Set(_) => "set".to_string(),
                Object::Instance { class, .. } => self.class_name(*class).to_string(),
                Object::Function(_) => "function".to_string(),
                Object::Class(_) => "type".to_string(),
                Object::BoundMethod { .. } => "method".to_string(),
                Object::Range { .. } => "range".to_string(),
                Object::Exception { kind, .. } => kind.name().to_string(),
                Object::Super { .. } => "super".to_string(),
            },
        }
    }

    pub fn class_name(&self, class: ObjId) -> &str {
        match self.get(class) {
            Object::Class(c) => &c.name,
            _ => "object",
        }
    }

    /// Look `name` up along the class chain of `class`.
    pub fn class_attr(&self, class: ObjId, name: &str) -> Option<Value> {
        let mut current = Some(class);
        let mut hops = 0;
        while let Some(id) = current {
            let Object::Class(c) = self.get(id) else { return None };
            if let Some(v) = c.attrs.get(name) {
                return Some(v.clone());
            }
            current = c.base.as_ref().and_then(Value::as_obj);
            hops += 1;
            if hops > 1_000 {
                return None;
            }
        }
        None
    }

    /// Built-in exception kind at the root of a class chain, if any.
    pub fn exception_root(&self, class: ObjId) -> Option<ExcKind> {
        let mut current = class;
        for _ in 0..1_000 {
            let Object::Class(c) = self.get(current) else { return None };
            match &c.base {
                Some(Value::Builtin(Builtin::Exception(kind))) => return Some(*kind),
                Some(Value::Obj(parent)) => current = *parent,
                _ => return None,
            }
        }
        None
    }

    /// Whether `class` is `ancestor` or derives from it.
    pub fn is_subclass(&self, class: ObjId, ancestor: ObjId) -> bool {
        let mut current = Some(class);
        let mut hops = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = match self.get(id) {
                Object::Class(c) => c.base.as_ref().and_then(Value::as_obj),
                _ => None,
            };
            hops += 1;
            if hops > 1_000 {
                return false;
            }
        }
        false
    }

    pub fn truthy(&self, value: &Value) -> bool {
        match value {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Builtin(_) => true,
            Value::Obj(id) => match self.get(*id) {
                Object::List(items) | Object::Tuple(items) => !items.is_empty(),
                Object::Set(items) => !items.is_empty(),
                Object::Dict(pairs) => !pairs.is_empty(),
                Object::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
                _ => true,
            },
        }
    }

    /// Structural equality; identical objects are always equal.
    pub fn equals(&self, a: &Value, b: &Value) -> bool {
        self.equals_at(a, b, 0)
    }

    fn equals_at(&self, a: &Value, b: &Value, depth: usize) -> bool {
        if depth > 200 {
            return false;
        }
        match (a, b) {
            (Value::None, Value::None) => true,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Float(_), _) | (_, Value::Float(_)) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => a.as_int() == b.as_int(),
            (Value::Builtin(x), Value::Builtin(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(*x), self.get(*y)) {
                    (Object::List(p), Object::List(q)) | (Object::Tuple(p), Object::Tuple(q)) => {
                        p.len() == q.len()
                            && p.iter().zip(q).all(|(u, v)| self.equals_at(u, v, depth + 1))
                    }
                    (Object::Set(p), Object::Set(q)) => {
                        p.len() == q.len() && p.hashes().all(|(hash, _)| q.contains(hash))
                    }
                    (Object::Dict(p), Object::Dict(q)) => {
                        p.len() == q.len()
                            && p.entries.iter().all(|(hash, (_, v))| match q.get(hash) {
                                Some(w) => self.equals_at(v, w, depth + 1),
                                None => false,
                            })
                    }
                    (
                        Object::Range { start, stop, step },
                        Object::Range {
                            start: s2,
                            stop: e2,
                            step: st2,
                        },
                    ) => (start, stop, step) == (s2, e2, st2),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Hash identity of `value`, or `None` for lists, dicts, sets and
    /// tuples that contain one.
    pub fn hash_key(&self, value: &Value) -> Option<HashKey> {
        self.hash_key_at(value, 0)
    }

    fn hash_key_at(&self, value: &Value, depth: usize) -> Option<HashKey> {
        if depth > 200 {
            return None;
        }
        let key = match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.abs() < 9.2e18 {
                    HashKey::Int(*x as i64)
                } else {
                    HashKey::Float(x.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Builtin(b) => HashKey::Builtin(*b),
            Value::Obj(id) => match self.get(*id) {
                Object::List(_) | Object::Dict(_) | Object::Set(_) => return None,
                Object::Tuple(items) => HashKey::Tuple(
                    items
                        .iter()
                        .map(|item| self.hash_key_at(item, depth + 1))
                        .collect::<Option<Vec<_>>>()?,
                ),
                Object::Range { start, stop, step } => HashKey::Range(*start, *stop, *step),
                _ => HashKey::Identity(*id),
            },
        };
        Some(key)
    }

    /// Ordering for `<` and friends; `None` when the operands are unorderable.
    pub fn compare(&self, a: &Value, b: &Value) -> Option<Ordering> {
        self.compare_at(a, b, 0)
    }

    fn compare_at(&self, a: &Value, b: &Value, depth: usize) -> Option<Ordering> {
        if depth > 200 {
            return None;
        }
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                Some(a.as_int()?.cmp(&b.as_int()?))
            }
            (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
                a.as_float()?.partial_cmp(&b.as_float()?)
            }
            (Value::Obj(x), Value::Obj(y)) => match (self.get(*x), self.get(*y)) {
                (Object::List(p), Object::List(q)) | (Object::Tuple(p), Object::Tuple(q)) => {
                    for (u, v) in p.iter().zip(q) {
                        if !self.equals_at(u, v, depth + 1) {
                            return self.compare_at(u, v, depth + 1);
                        }
                    }
                    Some(p.len().cmp(&q.len()))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Readable text for values that are never decomposed into a graph node.
    pub fn describe_opaque(&self, value: &Value) -> String {
        match value {
            Value::Builtin(Builtin::Function(f)) => format!("<built-in function {}>", f.name()),
            Value::Builtin(Builtin::Type(t)) => format!("<class '{}'>", t.name()),
            Value::Builtin(Builtin::Exception(k)) => format!("<class '{}'>", k.name()),
            Value::Obj(id) => match self.get(*id) {
                Object::Function(f) => format!("<function {}>", f.def.name),
                Object::Class(c) => format!("<class '__main__.{}'>", c.name),
                Object::BoundMethod { receiver, method } => {
                    let name = match method {
                        Method::User(f) => match self.get(*f) {
                            Object::Function(f) => f.def.name.clone(),
                            _ => "?".to_string(),
                        },
                        Method::Native(name) => name.to_string(),
                    };
                    format!("<bound method {}.{}>", self.type_name(receiver), name)
                }
                Object::Range { start, stop, step } => {
                    if *step == 1 {
                        format!("range({}, {})", start, stop)
                    } else {
                        format!("range({}, {}, {})", start, stop, step)
                    }
                }
                Object::Exception { kind, message } => {
                    format!("{}({})", kind.name(), quote_str(message))
                }
                Object::Super { class, .. } => {
                    format!("<super: <class '{}'>>", self.class_name(*class))
                }
                _ => format!("<{} object>", self.type_name(value)),
            },
            other => format!("<{}>", self.type_name(other)),
        }
    }
}

pub fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    let (lo, hi, step) = if step > 0 {
        (start, stop, step)
    } else {
        (stop, start, -step)
    };
    if step == 0 || lo >= hi {
        return 0;
    }
    let span = (hi as i128) - (lo as i128);
    ((span + step as i128 - 1) / step as i128).min(i64::MAX as i128) as i64
}

/// Python `repr()` of a string: single quotes unless the text contains one
/// and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python `repr()` of a float: shortest round-trip digits, exponent form
/// outside `1e-4 <= |x| < 1e16`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{:e}", x);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return format!("{:?}", x);
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return format!("{:?}", x);
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let body = if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
            } else {
                format!("{}.{}", &digits[..int_len], &digits[int_len..])
            }
        } else {
            format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
        }
    } else {
        let mantissa = if digits.len() == 1 {
            digits
        } else {
            format!("{}.{}", &digits[..1], &digits[1..])
        };
        format!(
            "{}e{}{:02}",
            mantissa,
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    };
    format!("{}{}", sign, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_format_like_python() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(123456.0), "123456.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn strings_quote_like_python() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn arena_ids_are_sequential_and_bounded() {
        let mut heap = Heap::new(2);
        let a = heap.alloc(Object::List(Vec::new())).unwrap();
        let b = heap.alloc(Object::Tuple(Vec::new())).unwrap();
        assert_eq!((a.serial(), b.serial()), (1, 2));
        assert_eq!(heap.alloc(Object::Set(SetStore::default())), Err(HeapExhausted { limit: 2 }));
    }

    #[test]
    fn equality_is_structural_and_numeric_aware() {
        let mut heap = Heap::new(10);
        let a = heap.alloc(Object::List(vec![Value::Int(1), Value::str("x")])).unwrap();
        let b = heap.alloc(Object::List(vec![Value::Float(1.0), Value::str("x")])).unwrap();
        assert!(heap.equals(&Value::Obj(a), &Value::Obj(b)));
        assert!(heap.equals(&Value::Bool(true), &Value::Int(1)));
        assert!(!heap.equals(&Value::str("1"), &Value::Int(1)));
        assert_eq!(heap.compare(&Value::Int(2), &Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(heap.compare(&Value::Int(2), &Value::str("a")), None);
    }

    #[test]
    fn self_containing_lists_compare_without_recursing_forever() {
        let mut heap = Heap::new(10);
        let a = heap.alloc(Object::List(Vec::new())).unwrap();
        if let Object::List(items) = heap.get_mut(a) {
            items.push(Value::Obj(a));
        }
        assert!(heap.equals(&Value::Obj(a), &Value::Obj(a)));
    }

    #[test]
    fn equal_values_share_a_hash_key() {
        let mut heap = Heap::new(10);
        assert_eq!(heap.hash_key(&Value::Int(1)), heap.hash_key(&Value::Float(1.0)));
        assert_eq!(heap.hash_key(&Value::Bool(true)), Some(HashKey::Int(1)));
        assert_ne!(heap.hash_key(&Value::Float(1.5)), heap.hash_key(&Value::Int(1)));

        let list = heap.alloc(Object::List(Vec::new())).unwrap();
        assert_eq!(heap.hash_key(&Value::Obj(list)), None);
        let nested = heap
            .alloc(Object::Tuple(vec![Value::Int(1), Value::Obj(list)]))
            .unwrap();
        assert_eq!(heap.hash_key(&Value::Obj(nested)), None);

        let a = heap.alloc(Object::Tuple(vec![Value::Int(1), Value::str("x")])).unwrap();
        let b = heap.alloc(Object::Tuple(vec![Value::Float(1.0), Value::str("x")])).unwrap();
        assert_eq!(heap.hash_key(&Value::Obj(a)), heap.hash_key(&Value::Obj(b)));
    }

    #[test]
    fn dict_store_keeps_first_key_and_insertion_order() {
        let mut dict = DictStore::default();
        dict.insert(HashKey::Int(1), Value::Int(1), Value::str("a"));
        dict.insert(HashKey::Int(2), Value::Int(2), Value::str("b"));
        dict.insert(HashKey::Int(1), Value::Float(1.0), Value::str("c"));

        assert_eq!(dict.len(), 2);
        let first = dict.iter().next().unwrap();
        assert!(matches!(first, (Value::Int(1), Value::Str(v)) if v.as_ref() == "c"));

        dict.remove(&HashKey::Int(1));
        assert!(matches!(dict.keys().next(), Some(Value::Int(2))));
    }

    #[test]
    fn exception_hierarchy() {
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::LookupError));
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::Exception));
        assert!(!ExcKind::ValueError.is_subclass_of(ExcKind::TypeError));
        assert!(ExcKind::UnboundLocalError.is_subclass_of(ExcKind::NameError));
    }

    #[test]
    fn range_lengths() {
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -2), 5);
        assert_eq!(range_len(5, 5, 1), 0);
        assert_eq!(range_len(0, 5, -1), 0);
    }
}
