//! Restricted evaluation context.
//!
//! The traced evaluator resolves free names against a [`SymbolTable`] built
//! from an allow-list. Nothing in it reaches the filesystem, spawns
//! processes, imports modules or evaluates strings as code: those names
//! simply do not exist, so using them raises `NameError`.

use crate::runtime::ast::{BinOp, CmpOp};
use crate::runtime::interpreter::{Eval, Interpreter, Unwind};
use crate::runtime::value::*;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Append-only capture buffer standing in for standard output.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    /// Append text; writes past the limit are dropped.
    pub fn write(&mut self, s: &str) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.text.len());
        if s.len() <= room {
            self.text.push_str(s);
            return;
        }
        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&s[..cut]);
        self.truncated = true;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Allow-listed names visible to traced programs.
#[derive(Debug)]
pub struct SymbolTable {
    entries: BTreeMap<&'static str, Value>,
    pub(crate) output: OutputBuffer,
}

const FUNCTIONS: [BuiltinFn; 22] = [
    BuiltinFn::Print,
    BuiltinFn::Len,
    BuiltinFn::Sum,
    BuiltinFn::Max,
    BuiltinFn::Min,
    BuiltinFn::Abs,
    BuiltinFn::Round,
    BuiltinFn::Sorted,
    BuiltinFn::Reversed,
    BuiltinFn::Enumerate,
    BuiltinFn::Zip,
    BuiltinFn::Isinstance,
    BuiltinFn::Repr,
    BuiltinFn::Any,
    BuiltinFn::All,
    BuiltinFn::Divmod,
    BuiltinFn::Pow,
    BuiltinFn::Ord,
    BuiltinFn::Chr,
    BuiltinFn::Map,
    BuiltinFn::Filter,
    BuiltinFn::Super,
];

const TYPES: [TypeName; 11] = [
    TypeName::Int,
    TypeName::Float,
    TypeName::Str,
    TypeName::Bool,
    TypeName::List,
    TypeName::Dict,
    TypeName::Tuple,
    TypeName::Set,
    TypeName::Range,
    TypeName::Type,
    TypeName::Object,
];

impl SymbolTable {
    pub fn restricted(output: OutputBuffer) -> Self {
        let mut entries = BTreeMap::new();
        for f in FUNCTIONS {
            entries.insert(f.name(), Value::Builtin(Builtin::Function(f)));
        }
        for t in TYPES {
            entries.insert(t.name(), Value::Builtin(Builtin::Type(t)));
        }
        for kind in ExcKind::ALL {
            entries.insert(kind.name(), Value::Builtin(Builtin::Exception(kind)));
        }
        entries.insert("__name__", Value::str("__main__"));
        Self { entries, output }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }
}

/// Keyword arguments accepted by a builtin, resolved by name.
struct Keywords(Vec<(String, Value)>);

impl Keywords {
    fn take(&mut self, name: &str) -> Option<Value> {
        let index = self.0.iter().position(|(k, _)| k == name)?;
        Some(self.0.remove(index).1)
    }
}

impl<'t> Interpreter<'t> {
    fn expect_args(&self, name: &str, args: &[Value], min: usize, max: usize) -> Eval<()> {
        if args.len() >= min && args.len() <= max {
            return Ok(());
        }
        let expected = if min == max {
            format!("exactly {}", min)
        } else if args.len() < min {
            format!("at least {}", min)
        } else {
            format!("at most {}", max)
        };
        let bound = if args.len() < min { min } else { max };
        self.type_error(format!(
            "{}() takes {} argument{} ({} given)",
            name,
            expected,
            if bound == 1 { "" } else { "s" },
            args.len()
        ))
    }

    fn no_leftover(&self, name: &str, kwargs: Keywords) -> Eval<()> {
        match kwargs.0.first() {
            Some((key, _)) => self.type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                name, key
            )),
            None => Ok(()),
        }
    }

    fn expect_str(&self, value: &Value, context: &str) -> Eval<Rc<str>> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => self.type_error(format!(
                "{} must be str, not {}",
                context,
                self.type_name(other)
            )),
        }
    }

    fn expect_int(&self, value: &Value, context: &str) -> Eval<i64> {
        match value.as_int() {
            Some(i) => Ok(i),
            None => self.type_error(format!(
                "'{}' object cannot be interpreted as an integer{}",
                self.type_name(value),
                if context.is_empty() { String::new() } else { format!(" in {}", context) }
            )),
        }
    }

    pub(crate) fn call_builtin(
        &mut self,
        f: BuiltinFn,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let name = f.name();
        let mut kw = Keywords(kwargs);
        match f {
            BuiltinFn::Print => {
                let sep = self.optional_text(kw.take("sep"), " ")?;
                let end = self.optional_text(kw.take("end"), "\n")?;
                self.no_leftover(name, kw)?;
                let mut line = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        line.push_str(&sep);
                    }
                    line.push_str(&self.to_str(arg)?);
                }
                line.push_str(&end);
                self.symbols.output.write(&line);
                Ok(Value::None)
            }
            BuiltinFn::Len => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                self.len_of(&args[0]).map(|n| Value::Int(n as i64))
            }
            BuiltinFn::Sum => {
                let start = kw.take("start");
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 2)?;
                let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return self.type_error("sum() can't sum strings [use ''.join(seq) instead]");
                }
                for item in self.iterate(&args[0])? {
                    total = self.binary_op(BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            BuiltinFn::Max | BuiltinFn::Min => {
                let key = kw.take("key").filter(|k| !matches!(k, Value::None));
                let default = kw.take("default");
                self.no_leftover(name, kw)?;
                if args.is_empty() {
                    return self.type_error(format!("{} expected at least 1 argument, got 0", name));
                }
                let items = if args.len() == 1 {
                    self.iterate(&args[0])?
                } else {
                    args
                };
                self.extreme(name, items, key, default, f == BuiltinFn::Max)
            }
            BuiltinFn::Abs => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Float(x) => Ok(Value::Float(x.abs())),
                    v => match v.as_int() {
                        Some(i) => i
                            .checked_abs()
                            .map(Value::Int)
                            .ok_or_else(|| self.error(ExcKind::OverflowError, "integer result does not fit in 64 bits")),
                        None => self.type_error(format!(
                            "bad operand type for abs(): '{}'",
                            self.type_name(v)
                        )),
                    },
                }
            }
            BuiltinFn::Round => {
                let ndigits = kw.take("ndigits");
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 2)?;
                let ndigits = match args.get(1).cloned().or(ndigits) {
                    None | Some(Value::None) => None,
                    Some(v) => Some(self.expect_int(&v, "")?),
                };
                self.round(&args[0], ndigits)
            }
            BuiltinFn::Sorted => {
                let key = kw.take("key").filter(|k| !matches!(k, Value::None));
                let reverse = match kw.take("reverse") {
                    Some(v) => self.truthy(&v)?,
                    None => false,
                };
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                let items = self.iterate(&args[0])?;
                let sorted = self.sort_values(items, key, reverse)?;
                self.new_list(sorted)
            }
            BuiltinFn::Reversed => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                let mut items = self.iterate(&args[0])?;
                items.reverse();
                self.new_list(items)
            }
            BuiltinFn::Enumerate => {
                let start = kw.take("start");
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 2)?;
                let start = match args.get(1).cloned().or(start) {
                    Some(v) => self.expect_int(&v, "")?,
                    None => 0,
                };
                let items = self.iterate(&args[0])?;
                let mut pairs = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let index = start
                        .checked_add(i as i64)
                        .ok_or_else(|| self.error(ExcKind::OverflowError, "enumerate index overflow"))?;
                    pairs.push(self.new_tuple(vec![Value::Int(index), item])?);
                }
                self.new_list(pairs)
            }
            BuiltinFn::Zip => {
                self.no_leftover(name, kw)?;
                let mut columns = Vec::with_capacity(args.len());
                for arg in &args {
                    columns.push(self.iterate(arg)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut rows = Vec::with_capacity(len);
                for i in 0..len {
                    let row = columns.iter().map(|c| c[i].clone()).collect();
                    rows.push(self.new_tuple(row)?);
                }
                self.new_list(rows)
            }
            BuiltinFn::Isinstance => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 2, 2)?;
                self.isinstance(&args[0], &args[1]).map(Value::Bool)
            }
            BuiltinFn::Repr => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                self.repr(&args[0]).map(|s| Value::Str(Rc::from(s)))
            }
            BuiltinFn::Any | BuiltinFn::All => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                let want = f == BuiltinFn::Any;
                for item in self.iterate(&args[0])? {
                    if self.truthy(&item)? == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            BuiltinFn::Divmod => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 2, 2)?;
                let q = self.binary_op(BinOp::FloorDiv, args[0].clone(), args[1].clone())?;
                let r = self.binary_op(BinOp::Mod, args[0].clone(), args[1].clone())?;
                self.new_tuple(vec![q, r])
            }
            BuiltinFn::Pow => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 2, 3)?;
                match args.get(2) {
                    None | Some(Value::None) => self.binary_op(BinOp::Pow, args[0].clone(), args[1].clone()),
                    Some(m) => self.modular_pow(&args[0], &args[1], m),
                }
            }
            BuiltinFn::Ord => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                let s = self.expect_str(&args[0], "ord() argument")?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Int(c as i64)),
                    _ => self.type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    )),
                }
            }
            BuiltinFn::Chr => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 1, 1)?;
                let code = self.expect_int(&args[0], "")?;
                match u32::try_from(code).ok().and_then(char::from_u32) {
                    Some(c) => Ok(Value::Str(Rc::from(c.to_string()))),
                    None => self.value_error("chr() arg not in range(0x110000)"),
                }
            }
            BuiltinFn::Map => {
                self.no_leftover(name, kw)?;
                if args.len() < 2 {
                    return self.type_error("map() must have at least two arguments.");
                }
                let mut columns = Vec::with_capacity(args.len() - 1);
                for arg in &args[1..] {
                    columns.push(self.iterate(arg)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(len);
                for i in 0..len {
                    let call_args = columns.iter().map(|c| c[i].clone()).collect();
                    out.push(self.call_value(args[0].clone(), call_args, Vec::new())?);
                }
                self.new_list(out)
            }
            BuiltinFn::Filter => {
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 2, 2)?;
                let mut out = Vec::new();
                for item in self.iterate(&args[1])? {
                    let keep = match &args[0] {
                        Value::None => self.truthy(&item)?,
                        predicate => {
                            let verdict = self.call_value(predicate.clone(), vec![item.clone()], Vec::new())?;
                            self.truthy(&verdict)?
                        }
                    };
                    if keep {
                        out.push(item);
                    }
                }
                self.new_list(out)
            }
            BuiltinFn::Super => {
                self.no_leftover(name, kw)?;
                if !args.is_empty() {
                    return self.type_error("super() arguments are not supported; use super()");
                }
                self.make_super()
            }
        }
    }

    fn optional_text(&mut self, value: Option<Value>, default: &str) -> Eval<String> {
        match value {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => self.type_error(format!(
                "sep and end must be None or a string, not {}",
                self.type_name(&other)
            )),
        }
    }

    pub(crate) fn len_of(&mut self, value: &Value) -> Eval<usize> {
        match value {
            Value::Str(s) => Ok(s.chars().count()),
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(items) | Object::Tuple(items) => Ok(items.len()),
                Object::Set(items) => Ok(items.len()),
                Object::Dict(pairs) => Ok(pairs.len()),
                Object::Range { start, stop, step } => Ok(range_len(*start, *stop, *step) as usize),
                Object::Instance { class, .. } => match self.heap.class_attr(*class, "__len__") {
                    Some(method) => {
                        let result = self.call_value(method, vec![value.clone()], Vec::new())?;
                        match result.as_int() {
                            Some(n) if n >= 0 => Ok(n as usize),
                            Some(_) => self.value_error("__len__() should return >= 0"),
                            None => self.type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                self.type_name(&result)
                            )),
                        }
                    }
                    None => self.no_len(value),
                },
                _ => self.no_len(value),
            },
            _ => self.no_len(value),
        }
    }

    fn no_len<T>(&self, value: &Value) -> Eval<T> {
        self.type_error(format!("object of type '{}' has no len()", self.type_name(value)))
    }

    fn extreme(
        &mut self,
        name: &str,
        items: Vec<Value>,
        key: Option<Value>,
        default: Option<Value>,
        want_max: bool,
    ) -> Eval<Value> {
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let k = match &key {
                Some(f) => self.call_value(f.clone(), vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => {
                    let ordering = self.order(&k, best_key, CmpOp::Gt)?;
                    if want_max {
                        ordering.is_gt()
                    } else {
                        ordering.is_lt()
                    }
                }
            };
            if replace {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => self.value_error(format!("{}() arg is an empty sequence", name)),
        }
    }

    /// Stable merge sort with a fallible comparison.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Eval<Vec<Value>> {
        let mut keys = Vec::with_capacity(items.len());
        for item in &items {
            keys.push(match &key {
                Some(f) => self.call_value(f.clone(), vec![item.clone()], Vec::new())?,
                None => item.clone(),
            });
        }
        let n = items.len();
        let mut order: Vec<usize> = (0..n).collect();
        let mut buffer = Vec::with_capacity(n);
        let mut width = 1;
        while width < n {
            let mut lo = 0;
            while lo < n {
                let mid = (lo + width).min(n);
                let hi = (lo + 2 * width).min(n);
                let (mut i, mut j) = (lo, mid);
                buffer.clear();
                while i < mid && j < hi {
                    // Take from the right run only when strictly before the left.
                    let (a, b) = if reverse {
                        (&keys[order[i]], &keys[order[j]])
                    } else {
                        (&keys[order[j]], &keys[order[i]])
                    };
                    if self.order(a, b, CmpOp::Lt)?.is_lt() {
                        buffer.push(order[j]);
                        j += 1;
                    } else {
                        buffer.push(order[i]);
                        i += 1;
                    }
                }
                buffer.extend_from_slice(&order[i..mid]);
                buffer.extend_from_slice(&order[j..hi]);
                order[lo..hi].copy_from_slice(&buffer);
                lo = hi;
            }
            self.poll()?;
            width *= 2;
        }
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    fn round(&mut self, value: &Value, ndigits: Option<i64>) -> Eval<Value> {
        match (value, ndigits) {
            (Value::Float(x), None) => {
                let r = x.round_ties_even();
                if r.is_nan() {
                    return self.value_error("cannot convert float NaN to integer");
                }
                if r.is_infinite() || r.abs() >= 9.2e18 {
                    return Err(self.error(ExcKind::OverflowError, "cannot convert float infinity to integer"));
                }
                Ok(Value::Int(r as i64))
            }
            (Value::Float(x), Some(n)) => {
                if !x.is_finite() {
                    return Ok(Value::Float(*x));
                }
                if n >= 0 {
                    let digits = n.min(300) as usize;
                    let text = format!("{:.*}", digits, x);
                    Ok(Value::Float(text.parse().unwrap_or(*x)))
                } else {
                    let scale = 10f64.powi(n.saturating_neg().min(308) as i32);
                    Ok(Value::Float((x / scale).round_ties_even() * scale))
                }
            }
            (v, n) => {
                let Some(i) = v.as_int() else {
                    return self.type_error(format!(
                        "type {} doesn't define __round__ method",
                        self.type_name(v)
                    ));
                };
                match n {
                    Some(n) if n < 0 => {
                        let Some(scale) = u32::try_from(-n).ok().and_then(|e| 10i128.checked_pow(e)) else {
                            return Ok(Value::Int(0));
                        };
                        let i = i as i128;
                        let q = i.div_euclid(scale);
                        let r = i.rem_euclid(scale);
                        let q = match (2 * r).cmp(&scale) {
                            std::cmp::Ordering::Greater => q + 1,
                            std::cmp::Ordering::Equal if q % 2 != 0 => q + 1,
                            _ => q,
                        };
                        i64::try_from(q * scale)
                            .map(Value::Int)
                            .map_err(|_| self.error(ExcKind::OverflowError, "integer result does not fit in 64 bits"))
                    }
                    _ => Ok(Value::Int(i)),
                }
            }
        }
    }

    fn modular_pow(&mut self, base: &Value, exp: &Value, modulus: &Value) -> Eval<Value> {
        let (Some(base), Some(exp), Some(m)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
            return self.type_error("pow() 3rd argument not allowed unless all arguments are integers");
        };
        if m == 0 {
            return self.value_error("pow() 3rd argument cannot be 0");
        }
        if exp < 0 {
            return self.value_error("base is not invertible for the given modulus");
        }
        let m = m as i128;
        let mut result: i128 = 1 % m;
        let mut b = (base as i128).rem_euclid(m);
        let mut e = exp;
        while e > 0 {
            if e & 1 == 1 {
                result = (result * b).rem_euclid(m);
            }
            b = (b * b).rem_euclid(m);
            e >>= 1;
        }
        // Result takes the sign of the modulus.
        if m < 0 && result > 0 {
            result += m;
        }
        Ok(Value::Int(result as i64))
    }

    pub(crate) fn isinstance(&self, value: &Value, classinfo: &Value) -> Eval<bool> {
        match classinfo {
            Value::Builtin(Builtin::Type(t)) => Ok(self.is_builtin_instance(value, *t)),
            Value::Builtin(Builtin::Exception(kind)) => Ok(match value {
                Value::Obj(id) => match self.heap.get(*id) {
                    Object::Exception { kind: k, .. } => k.is_subclass_of(*kind),
                    Object::Instance { class, .. } => self
                        .heap
                        .exception_root(*class)
                        .is_some_and(|root| root.is_subclass_of(*kind)),
                    _ => false,
                },
                _ => false,
            }),
            Value::Obj(id) => match self.heap.get(*id) {
                Object::Class(_) => Ok(match value {
                    Value::Obj(v) => match self.heap.get(*v) {
                        Object::Instance { class, .. } => self.heap.is_subclass(*class, *id),
                        _ => false,
                    },
                    _ => false,
                }),
                Object::Tuple(options) => {
                    for option in options {
                        if self.isinstance(value, option)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                _ => self.type_error("isinstance() arg 2 must be a type or tuple of types"),
            },
            _ => self.type_error("isinstance() arg 2 must be a type or tuple of types"),
        }
    }

    fn is_builtin_instance(&self, value: &Value, t: TypeName) -> bool {
        let object = value.as_obj().map(|id| self.heap.get(id));
        match t {
            TypeName::Object => true,
            TypeName::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
            TypeName::Bool => matches!(value, Value::Bool(_)),
            TypeName::Float => matches!(value, Value::Float(_)),
            TypeName::Str => matches!(value, Value::Str(_)),
            TypeName::NoneType => matches!(value, Value::None),
            TypeName::List => matches!(object, Some(Object::List(_))),
            TypeName::Dict => matches!(object, Some(Object::Dict(_))),
            TypeName::Tuple => matches!(object, Some(Object::Tuple(_))),
            TypeName::Set => matches!(object, Some(Object::Set(_))),
            TypeName::Range => matches!(object, Some(Object::Range { .. })),
            TypeName::Function => matches!(object, Some(Object::Function(_))),
            TypeName::Method => matches!(object, Some(Object::BoundMethod { .. })),
            TypeName::BuiltinFunction => matches!(value, Value::Builtin(Builtin::Function(_))),
            TypeName::Type => {
                matches!(value, Value::Builtin(Builtin::Type(_) | Builtin::Exception(_)))
                    || matches!(object, Some(Object::Class(_)))
            }
        }
    }

    /// `type(value)`
    pub(crate) fn type_of(&self, value: &Value) -> Value {
        let t = match value {
            Value::None => TypeName::NoneType,
            Value::Bool(_) => TypeName::Bool,
            Value::Int(_) => TypeName::Int,
            Value::Float(_) => TypeName::Float,
            Value::Str(_) => TypeName::Str,
            Value::Builtin(Builtin::Function(_)) => TypeName::BuiltinFunction,
            Value::Builtin(_) => TypeName::Type,
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(_) => TypeName::List,
                Object::Tuple(_) => TypeName::Tuple,
                Object::Dict(_) => TypeName::Dict,
                Object::Set(_) => TypeName::Set,
                Object::Range { .. } => TypeName::Range,
                Object::Function(_) => TypeName::Function,
                Object::BoundMethod { .. } => TypeName::Method,
                Object::Class(_) => TypeName::Type,
                Object::Super { .. } => TypeName::Object,
                Object::Instance { class, .. } => return Value::Obj(*class),
                Object::Exception { kind, .. } => return Value::Builtin(Builtin::Exception(*kind)),
            },
        };
        Value::Builtin(Builtin::Type(t))
    }

    /// Call a built-in type as a constructor.
    pub(crate) fn construct(
        &mut self,
        t: TypeName,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let name = t.name();
        let mut kw = Keywords(kwargs);
        if t != TypeName::Dict && t != TypeName::Int {
            self.no_leftover(name, Keywords(std::mem::take(&mut kw.0)))?;
        }
        match t {
            TypeName::Int => {
                let base = kw.take("base");
                self.no_leftover(name, kw)?;
                self.expect_args(name, &args, 0, 2)?;
                let base = match args.get(1).cloned().or(base) {
                    Some(b) => Some(self.expect_int(&b, "")?),
                    None => None,
                };
                match args.first() {
                    None => Ok(Value::Int(0)),
                    Some(v) => self.to_int(v, base),
                }
            }
            TypeName::Float => {
                self.expect_args(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => {
                        let text = s.trim().replace('_', "");
                        match text.parse::<f64>() {
                            Ok(x) => Ok(Value::Float(x)),
                            Err(_) => self.value_error(format!(
                                "could not convert string to float: {}",
                                quote_str(s)
                            )),
                        }
                    }
                    Some(v) => match v.as_float() {
                        Some(x) => Ok(Value::Float(x)),
                        None => self.type_error(format!(
                            "float() argument must be a string or a real number, not '{}'",
                            self.type_name(v)
                        )),
                    },
                }
            }
            TypeName::Str => {
                self.expect_args(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::str("")),
                    Some(v) => self.to_str(v).map(|s| Value::Str(Rc::from(s))),
                }
            }
            TypeName::Bool => {
                self.expect_args(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Bool(false)),
                    Some(v) => self.truthy(v).map(Value::Bool),
                }
            }
            TypeName::List | TypeName::Tuple | TypeName::Set => {
                self.expect_args(name, &args, 0, 1)?;
                let items = match args.first() {
                    None => Vec::new(),
                    Some(v) => self.iterate(v)?,
                };
                match t {
                    TypeName::List => self.new_list(items),
                    TypeName::Tuple => self.new_tuple(items),
                    _ => self.new_set(items),
                }
            }
            TypeName::Dict => {
                self.expect_args(name, &args, 0, 1)?;
                let mut pairs = match args.first() {
                    None => Vec::new(),
                    Some(v) => self.pairs_of(v)?,
                };
                pairs.extend(kw.0.into_iter().map(|(k, v)| (Value::Str(Rc::from(k)), v)));
                self.new_dict(pairs)
            }
            TypeName::Range => {
                self.expect_args(name, &args, 1, 3)?;
                let mut ints = Vec::with_capacity(args.len());
                for arg in &args {
                    ints.push(self.expect_int(arg, "")?);
                }
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => (0, 0, 1),
                };
                if step == 0 {
                    return self.value_error("range() arg 3 must not be zero");
                }
                self.alloc(Object::Range { start, stop, step })
            }
            TypeName::Type => {
                self.expect_args(name, &args, 1, 1)?;
                Ok(self.type_of(&args[0]))
            }
            TypeName::Object => {
                self.expect_args(name, &args, 0, 0)?;
                let class = self.alloc(Object::Class(Class {
                    name: "object".to_string(),
                    base: None,
                    attrs: Default::default(),
                }))?;
                let Some(class) = class.as_obj() else {
                    return Ok(Value::None);
                };
                self.alloc(Object::Instance {
                    class,
                    attrs: Default::default(),
                    exc_message: None,
                })
            }
            TypeName::NoneType | TypeName::Function | TypeName::Method | TypeName::BuiltinFunction => {
                self.type_error(format!("cannot create '{}' instances", name))
            }
        }
    }

    fn to_int(&mut self, value: &Value, base: Option<i64>) -> Eval<Value> {
        match value {
            Value::Str(s) => {
                let base = base.unwrap_or(10);
                if !(2..=36).contains(&base) && base != 0 {
                    return self.value_error("int() base must be >= 2 and <= 36, or 0");
                }
                let cleaned = s.trim().replace('_', "");
                let (negative, digits) = match cleaned.strip_prefix('-') {
                    Some(rest) => (true, rest.to_string()),
                    None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned).to_string()),
                };
                let lowered = digits.to_ascii_lowercase();
                let (radix, body) = match (base, lowered.get(..2)) {
                    (0 | 16, Some("0x")) => (16, &digits[2..]),
                    (0 | 8, Some("0o")) => (8, &digits[2..]),
                    (0 | 2, Some("0b")) => (2, &digits[2..]),
                    (0, _) => (10, digits.as_str()),
                    (b, _) => (b as u32, digits.as_str()),
                };
                let invalid = || {
                    self.error(
                        ExcKind::ValueError,
                        format!("invalid literal for int() with base {}: {}", base, quote_str(s)),
                    )
                };
                if body.is_empty() || body.starts_with(['+', '-']) {
                    return Err(invalid());
                }
                match i64::from_str_radix(&format!("{}{}", if negative { "-" } else { "" }, body), radix) {
                    Ok(i) => Ok(Value::Int(i)),
                    Err(e) => match e.kind() {
                        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => Err(self
                            .error(ExcKind::OverflowError, "integer result does not fit in 64 bits")),
                        _ => Err(invalid()),
                    },
                }
            }
            _ if base.is_some() => self.type_error("int() can't convert non-string with explicit base"),
            Value::Float(x) => {
                if x.is_nan() {
                    return self.value_error("cannot convert float NaN to integer");
                }
                let t = x.trunc();
                if t.is_infinite() || t.abs() >= 9.2e18 {
                    return Err(self.error(ExcKind::OverflowError, "cannot convert float infinity to integer"));
                }
                Ok(Value::Int(t as i64))
            }
            v => match v.as_int() {
                Some(i) => Ok(Value::Int(i)),
                None => self.type_error(format!(
                    "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                    self.type_name(v)
                )),
            },
        }
    }

    /// Key/value pairs of a mapping or of an iterable of pairs.
    pub(crate) fn pairs_of(&mut self, value: &Value) -> Eval<Vec<(Value, Value)>> {
        if let Some(Object::Dict(pairs)) = value.as_obj().map(|id| self.heap.get(id)) {
            return Ok(pairs.pairs());
        }
        let mut pairs = Vec::new();
        for (index, item) in self.iterate(value)?.into_iter().enumerate() {
            let parts = match self.iterate(&item) {
                Ok(parts) => parts,
                Err(Unwind::Interrupted(interrupt)) => return Err(Unwind::Interrupted(interrupt)),
                Err(Unwind::Exception(_)) => {
                    return self.type_error(format!(
                        "cannot convert dictionary update sequence element #{} to a sequence",
                        index
                    ))
                }
            };
            let [k, v]: [Value; 2] = match parts.try_into() {
                Ok(kv) => kv,
                Err(parts) => {
                    let parts: Vec<Value> = parts;
                    return self.value_error(format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        index,
                        parts.len()
                    ));
                }
            };
            pairs.push((k, v));
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_table_omits_dangerous_names() {
        let table = SymbolTable::restricted(OutputBuffer::new(1024));
        for allowed in ["print", "len", "range", "int", "sorted", "isinstance", "type", "repr"] {
            assert!(table.contains(allowed), "{allowed} should be available");
        }
        for denied in ["open", "exec", "eval", "__import__", "compile", "globals", "getattr", "input"] {
            assert!(!table.contains(denied), "{denied} must be absent");
        }
    }

    #[test]
    fn output_buffer_truncates_on_char_boundary() {
        let mut out = OutputBuffer::new(5);
        out.write("abc");
        out.write("déf");
        assert_eq!(out.text(), "abcd");
        assert!(out.is_truncated());
        out.write("more");
        assert_eq!(out.text(), "abcd");
    }
}
