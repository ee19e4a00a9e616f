//! Methods of the built-in container and string types.

use crate::runtime::interpreter::{Eval, Interpreter};
use crate::runtime::value::*;
use std::rc::Rc;

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];
const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "discard", "intersection", "remove", "union", "update",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "endswith", "find", "format", "index", "isalnum", "isalpha",
    "isdigit", "islower", "isspace", "isupper", "join", "ljust", "lower", "lstrip", "replace", "rjust",
    "rstrip", "split", "splitlines", "startswith", "strip", "title", "upper", "zfill",
];

#[derive(Clone, Copy)]
enum Receiver {
    Str,
    List,
    Dict,
    Set,
    Tuple,
}

impl<'t> Interpreter<'t> {
    fn receiver_kind(&self, value: &Value) -> Option<Receiver> {
        match value {
            Value::Str(_) => Some(Receiver::Str),
            Value::Obj(id) => match self.heap.get(*id) {
                Object::List(_) => Some(Receiver::List),
                Object::Dict(_) => Some(Receiver::Dict),
                Object::Set(_) => Some(Receiver::Set),
                Object::Tuple(_) => Some(Receiver::Tuple),
                _ => None,
            },
            _ => None,
        }
    }

    /// Static name of a built-in method of `value`, if it has one.
    pub(crate) fn native_method_name(&self, value: &Value, name: &str) -> Option<&'static str> {
        let table = match self.receiver_kind(value)? {
            Receiver::Str => STR_METHODS,
            Receiver::List => LIST_METHODS,
            Receiver::Dict => DICT_METHODS,
            Receiver::Set => SET_METHODS,
            Receiver::Tuple => TUPLE_METHODS,
        };
        table.iter().find(|m| **m == name).copied()
    }

    pub(crate) fn call_native(
        &mut self,
        receiver: Value,
        name: &'static str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let kind = self.receiver_kind(&receiver);
        let allows_kwargs = matches!((kind, name), (Some(Receiver::List), "sort") | (Some(Receiver::Dict), "update"));
        if !allows_kwargs {
            if !kwargs.is_empty() {
                return self.type_error(format!("{}() takes no keyword arguments", name));
            }
        }
        match (kind, &receiver) {
            (Some(Receiver::Str), Value::Str(s)) => self.str_method(s.clone(), name, args, kwargs),
            (Some(Receiver::List), Value::Obj(id)) => self.list_method(*id, name, args, kwargs),
            (Some(Receiver::Dict), Value::Obj(id)) => self.dict_method(*id, name, args, kwargs),
            (Some(Receiver::Set), Value::Obj(id)) => self.set_method(*id, name, args),
            (Some(Receiver::Tuple), Value::Obj(id)) => self.tuple_method(*id, name, args),
            _ => Err(self.error(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{}'", self.type_name(&receiver), name),
            )),
        }
    }

    fn arity(&self, name: &str, args: &[Value], min: usize, max: usize) -> Eval<()> {
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                format!("exactly {}", min)
            } else if args.len() < min {
                format!("at least {}", min)
            } else {
                format!("at most {}", max)
            };
            return self.type_error(format!(
                "{}() takes {} argument{} ({} given)",
                name,
                expected,
                if min == max && min == 1 { "" } else { "s" },
                args.len()
            ));
        }
        Ok(())
    }

    fn items_of(&self, id: ObjId) -> Vec<Value> {
        match self.heap.get(id) {
            Object::List(items) | Object::Tuple(items) => items.clone(),
            Object::Set(items) => items.to_vec(),
            _ => Vec::new(),
        }
    }

    fn position_of(&mut self, items: &[Value], wanted: &Value) -> Eval<Option<usize>> {
        for (i, item) in items.iter().enumerate() {
            if self.values_equal(item, wanted)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn count_of(&mut self, items: &[Value], wanted: &Value) -> Eval<usize> {
        let mut n = 0;
        for item in items {
            if self.values_equal(item, wanted)? {
                n += 1;
            }
        }
        Ok(n)
    }

    fn with_list<R>(&mut self, id: ObjId, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        match self.heap.get_mut(id) {
            Object::List(items) => Some(f(items)),
            _ => None,
        }
    }

    fn list_method(
        &mut self,
        id: ObjId,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        match name {
            "append" => {
                self.arity(name, &args, 1, 1)?;
                let len = self.items_len(id);
                self.check_len(len + 1)?;
                let item = args.into_iter().next().unwrap_or(Value::None);
                self.with_list(id, |items| items.push(item));
                Ok(Value::None)
            }
            "extend" => {
                self.arity(name, &args, 1, 1)?;
                let extra = self.iterate(&args[0])?;
                self.extend_list(id, extra)?;
                Ok(Value::None)
            }
            "insert" => {
                self.arity(name, &args, 2, 2)?;
                let Some(index) = args[0].as_int() else {
                    return self.type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        self.type_name(&args[0])
                    ));
                };
                let len = self.items_len(id);
                self.check_len(len + 1)?;
                let len = len as i64;
                let at = (if index < 0 { (index + len).max(0) } else { index.min(len) }) as usize;
                let item = args[1].clone();
                self.with_list(id, |items| items.insert(at, item));
                Ok(Value::None)
            }
            "pop" => {
                self.arity(name, &args, 0, 1)?;
                let len = self.items_len(id) as i64;
                if len == 0 {
                    return Err(self.error(ExcKind::IndexError, "pop from empty list"));
                }
                let index = match args.first() {
                    None => len - 1,
                    Some(v) => match v.as_int() {
                        Some(i) if i < 0 => i + len,
                        Some(i) => i,
                        None => {
                            return self.type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                self.type_name(v)
                            ))
                        }
                    },
                };
                if index < 0 || index >= len {
                    return Err(self.error(ExcKind::IndexError, "pop index out of range"));
                }
                Ok(self
                    .with_list(id, |items| items.remove(index as usize))
                    .unwrap_or(Value::None))
            }
            "remove" => {
                self.arity(name, &args, 1, 1)?;
                let items = self.items_of(id);
                match self.position_of(&items, &args[0])? {
                    Some(i) => {
                        self.with_list(id, |items| {
                            if i < items.len() {
                                items.remove(i);
                            }
                        });
                        Ok(Value::None)
                    }
                    None => self.value_error("list.remove(x): x not in list"),
                }
            }
            "index" => {
                self.arity(name, &args, 1, 1)?;
                let items = self.items_of(id);
                match self.position_of(&items, &args[0])? {
                    Some(i) => Ok(Value::Int(i as i64)),
                    None => {
                        let shown = self.repr(&args[0])?;
                        self.value_error(format!("{} is not in list", shown))
                    }
                }
            }
            "count" => {
                self.arity(name, &args, 1, 1)?;
                let items = self.items_of(id);
                self.count_of(&items, &args[0]).map(|n| Value::Int(n as i64))
            }
            "reverse" => {
                self.arity(name, &args, 0, 0)?;
                self.with_list(id, |items| items.reverse());
                Ok(Value::None)
            }
            "clear" => {
                self.arity(name, &args, 0, 0)?;
                self.with_list(id, Vec::clear);
                Ok(Value::None)
            }
            "copy" => {
                self.arity(name, &args, 0, 0)?;
                let items = self.items_of(id);
                self.new_list(items)
            }
            "sort" => {
                self.arity(name, &args, 0, 0)?;
                let mut key = None;
                let mut reverse = false;
                for (k, v) in kwargs {
                    match k.as_str() {
                        "key" if !matches!(v, Value::None) => key = Some(v),
                        "key" => {}
                        "reverse" => reverse = self.truthy(&v)?,
                        other => {
                            return self.type_error(format!(
                                "sort() got an unexpected keyword argument '{}'",
                                other
                            ))
                        }
                    }
                }
                let items = self.items_of(id);
                let sorted = self.sort_values(items, key, reverse)?;
                self.with_list(id, |items| *items = sorted);
                Ok(Value::None)
            }
            _ => self.missing_method("list", name),
        }
    }

    fn items_len(&self, id: ObjId) -> usize {
        match self.heap.get(id) {
            Object::List(items) | Object::Tuple(items) => items.len(),
            Object::Set(items) => items.len(),
            Object::Dict(pairs) => pairs.len(),
            _ => 0,
        }
    }

    fn missing_method<T>(&self, type_name: &str, name: &str) -> Eval<T> {
        Err(self.error(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, name),
        ))
    }

    fn dict_pairs(&self, id: ObjId) -> Vec<(Value, Value)> {
        match self.heap.get(id) {
            Object::Dict(pairs) => pairs.pairs(),
            _ => Vec::new(),
        }
    }

    fn dict_get(&self, id: ObjId, key: &Value) -> Eval<Option<Value>> {
        let hash = self.hash_key(key)?;
        Ok(match self.heap.get(id) {
            Object::Dict(pairs) => pairs.get(&hash).cloned(),
            _ => None,
        })
    }

    fn dict_insert(&mut self, id: ObjId, key: Value, value: Value) -> Eval<()> {
        let hash = self.hash_key(&key)?;
        let len = match self.heap.get(id) {
            Object::Dict(pairs) if !pairs.contains(&hash) => pairs.len() + 1,
            _ => 0,
        };
        self.check_len(len)?;
        if let Object::Dict(pairs) = self.heap.get_mut(id) {
            pairs.insert(hash, key, value);
        }
        Ok(())
    }

    fn dict_method(
        &mut self,
        id: ObjId,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        match name {
            "get" => {
                self.arity(name, &args, 1, 2)?;
                Ok(match self.dict_get(id, &args[0])? {
                    Some(value) => value,
                    None => args.get(1).cloned().unwrap_or(Value::None),
                })
            }
            "keys" | "values" | "items" => {
                self.arity(name, &args, 0, 0)?;
                let pairs = self.dict_pairs(id);
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push(match name {
                        "keys" => k,
                        "values" => v,
                        _ => self.new_tuple(vec![k, v])?,
                    });
                }
                self.new_list(out)
            }
            "pop" => {
                self.arity(name, &args, 1, 2)?;
                let hash = self.hash_key(&args[0])?;
                let removed = match self.heap.get_mut(id) {
                    Object::Dict(pairs) => pairs.remove(&hash),
                    _ => None,
                };
                match (removed, args.get(1)) {
                    (Some((_, value)), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => {
                        let key = self.repr(&args[0])?;
                        Err(self.error(ExcKind::KeyError, key))
                    }
                }
            }
            "popitem" => {
                self.arity(name, &args, 0, 0)?;
                let last = match self.heap.get_mut(id) {
                    Object::Dict(pairs) => pairs.pop_last(),
                    _ => None,
                };
                match last {
                    Some((k, v)) => self.new_tuple(vec![k, v]),
                    None => Err(self.error(ExcKind::KeyError, "'popitem(): dictionary is empty'")),
                }
            }
            "setdefault" => {
                self.arity(name, &args, 1, 2)?;
                if let Some(value) = self.dict_get(id, &args[0])? {
                    return Ok(value);
                }
                let default = args.get(1).cloned().unwrap_or(Value::None);
                self.dict_insert(id, args[0].clone(), default.clone())?;
                Ok(default)
            }
            "update" => {
                self.arity(name, &args, 0, 1)?;
                let mut pairs = match args.first() {
                    Some(other) => self.pairs_of(other)?,
                    None => Vec::new(),
                };
                pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::Str(Rc::from(k)), v)));
                for (k, v) in pairs {
                    self.dict_insert(id, k, v)?;
                }
                Ok(Value::None)
            }
            "clear" => {
                self.arity(name, &args, 0, 0)?;
                if let Object::Dict(pairs) = self.heap.get_mut(id) {
                    pairs.clear();
                }
                Ok(Value::None)
            }
            "copy" => {
                self.arity(name, &args, 0, 0)?;
                let copy = match self.heap.get(id) {
                    Object::Dict(pairs) => pairs.clone(),
                    _ => DictStore::default(),
                };
                self.alloc(Object::Dict(copy))
            }
            _ => self.missing_method("dict", name),
        }
    }

    fn set_method(&mut self, id: ObjId, name: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "add" => {
                self.arity(name, &args, 1, 1)?;
                self.set_add(id, args[0].clone())?;
                Ok(Value::None)
            }
            "update" => {
                for other in &args {
                    for item in self.iterate(other)? {
                        self.set_add(id, item)?;
                    }
                }
                Ok(Value::None)
            }
            "discard" | "remove" => {
                self.arity(name, &args, 1, 1)?;
                let hash = self.hash_key(&args[0])?;
                let removed = match self.heap.get_mut(id) {
                    Object::Set(items) => items.remove(&hash),
                    _ => None,
                };
                if removed.is_none() && name == "remove" {
                    let key = self.repr(&args[0])?;
                    return Err(self.error(ExcKind::KeyError, key));
                }
                Ok(Value::None)
            }
            "pop" => {
                self.arity(name, &args, 0, 0)?;
                let first = match self.heap.get_mut(id) {
                    Object::Set(items) => items.pop_first(),
                    _ => None,
                };
                match first {
                    Some(item) => Ok(item),
                    None => Err(self.error(ExcKind::KeyError, "'pop from an empty set'")),
                }
            }
            "union" | "intersection" | "difference" => {
                let mut result = match self.heap.get(id) {
                    Object::Set(items) => items.clone(),
                    _ => SetStore::default(),
                };
                for other in &args {
                    let mut other_items = SetStore::default();
                    for item in self.iterate(other)? {
                        let hash = self.hash_key(&item)?;
                        other_items.insert(hash, item);
                    }
                    result = match name {
                        "union" => {
                            for (hash, item) in other_items.hashes() {
                                result.insert(hash.clone(), item.clone());
                            }
                            result
                        }
                        _ => {
                            let keep_shared = name == "intersection";
                            let mut kept = SetStore::default();
                            for (hash, item) in result.hashes() {
                                if other_items.contains(hash) == keep_shared {
                                    kept.insert(hash.clone(), item.clone());
                                }
                            }
                            kept
                        }
                    };
                }
                self.check_len(result.len())?;
                self.alloc(Object::Set(result))
            }
            "clear" => {
                self.arity(name, &args, 0, 0)?;
                if let Object::Set(items) = self.heap.get_mut(id) {
                    items.clear();
                }
                Ok(Value::None)
            }
            "copy" => {
                self.arity(name, &args, 0, 0)?;
                let copy = match self.heap.get(id) {
                    Object::Set(items) => items.clone(),
                    _ => SetStore::default(),
                };
                self.alloc(Object::Set(copy))
            }
            _ => self.missing_method("set", name),
        }
    }

    fn set_add(&mut self, id: ObjId, item: Value) -> Eval<()> {
        let hash = self.hash_key(&item)?;
        let len = match self.heap.get(id) {
            Object::Set(items) if !items.contains(&hash) => items.len() + 1,
            _ => return Ok(()),
        };
        self.check_len(len)?;
        if let Object::Set(items) = self.heap.get_mut(id) {
            items.insert(hash, item);
        }
        Ok(())
    }

    fn tuple_method(&mut self, id: ObjId, name: &str, args: Vec<Value>) -> Eval<Value> {
        self.arity(name, &args, 1, 1)?;
        let items = self.items_of(id);
        match name {
            "count" => self.count_of(&items, &args[0]).map(|n| Value::Int(n as i64)),
            "index" => match self.position_of(&items, &args[0])? {
                Some(i) => Ok(Value::Int(i as i64)),
                None => self.value_error("tuple.index(x): x not in tuple"),
            },
            _ => self.missing_method("tuple", name),
        }
    }

    fn str_arg(&self, method: &str, value: &Value) -> Eval<Rc<str>> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => self.type_error(format!(
                "{}() argument must be str, not {}",
                method,
                self.type_name(other)
            )),
        }
    }

    fn strip_arg(&self, method: &str, args: &[Value]) -> Eval<Option<Vec<char>>> {
        match args.first() {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(self.str_arg(method, v)?.chars().collect())),
        }
    }

    fn str_method(
        &mut self,
        s: Rc<str>,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let text = |t: String| -> Eval<Value> { Ok(Value::Str(Rc::from(t))) };
        match name {
            "upper" => {
                self.arity(name, &args, 0, 0)?;
                text(s.to_uppercase())
            }
            "lower" => {
                self.arity(name, &args, 0, 0)?;
                text(s.to_lowercase())
            }
            "strip" | "lstrip" | "rstrip" => {
                self.arity(name, &args, 0, 1)?;
                let chars = self.strip_arg(name, &args)?;
                let matches = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                let stripped = match name {
                    "strip" => s.trim_matches(matches),
                    "lstrip" => s.trim_start_matches(matches),
                    _ => s.trim_end_matches(matches),
                };
                text(stripped.to_string())
            }
            "split" => {
                self.arity(name, &args, 0, 2)?;
                let maxsplit = match args.get(1) {
                    Some(v) => v.as_int().unwrap_or(-1),
                    None => -1,
                };
                let parts: Vec<String> = match args.first() {
                    None | Some(Value::None) => {
                        let mut parts = Vec::new();
                        let mut rest = s.trim_start();
                        while !rest.is_empty() {
                            if maxsplit >= 0 && parts.len() as i64 == maxsplit {
                                parts.push(rest.to_string());
                                break;
                            }
                            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                            parts.push(rest[..end].to_string());
                            rest = rest[end..].trim_start();
                        }
                        parts
                    }
                    Some(sep) => {
                        let sep = self.str_arg(name, sep)?;
                        if sep.is_empty() {
                            return self.value_error("empty separator");
                        }
                        if maxsplit >= 0 {
                            s.splitn(maxsplit as usize + 1, sep.as_ref()).map(str::to_string).collect()
                        } else {
                            s.split(sep.as_ref()).map(str::to_string).collect()
                        }
                    }
                };
                self.check_len(parts.len())?;
                let items = parts.into_iter().map(|p| Value::Str(Rc::from(p))).collect();
                self.new_list(items)
            }
            "splitlines" => {
                self.arity(name, &args, 0, 0)?;
                let items = s.lines().map(Value::str).collect();
                self.new_list(items)
            }
            "join" => {
                self.arity(name, &args, 1, 1)?;
                let items = self.iterate(&args[0])?;
                let mut out = String::new();
                for (i, item) in items.iter().enumerate() {
                    let Value::Str(part) = item else {
                        return self.type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            self.type_name(item)
                        ));
                    };
                    if i > 0 {
                        out.push_str(&s);
                    }
                    out.push_str(part);
                    self.check_len(out.len())?;
                }
                text(out)
            }
            "replace" => {
                self.arity(name, &args, 2, 3)?;
                let old = self.str_arg(name, &args[0])?;
                let new = self.str_arg(name, &args[1])?;
                let count = args.get(2).and_then(Value::as_int).unwrap_or(-1);
                let replaced = if count < 0 {
                    s.replace(old.as_ref(), &new)
                } else {
                    s.replacen(old.as_ref(), &new, count as usize)
                };
                self.check_len(replaced.len())?;
                text(replaced)
            }
            "startswith" | "endswith" => {
                self.arity(name, &args, 1, 1)?;
                let candidates = match &args[0] {
                    Value::Str(p) => vec![p.clone()],
                    other => {
                        let mut out = Vec::new();
                        let is_tuple = matches!(other.as_obj().map(|id| self.heap.get(id)), Some(Object::Tuple(_)));
                        if !is_tuple {
                            return self.type_error(format!(
                                "{} first arg must be str or a tuple of str, not {}",
                                name,
                                self.type_name(other)
                            ));
                        }
                        for item in self.iterate(other)? {
                            out.push(self.str_arg(name, &item)?);
                        }
                        out
                    }
                };
                let hit = candidates.iter().any(|p| {
                    if name == "startswith" {
                        s.starts_with(p.as_ref())
                    } else {
                        s.ends_with(p.as_ref())
                    }
                });
                Ok(Value::Bool(hit))
            }
            "find" | "index" => {
                self.arity(name, &args, 1, 1)?;
                let needle = self.str_arg(name, &args[0])?;
                match s.find(needle.as_ref()) {
                    Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
                    None if name == "find" => Ok(Value::Int(-1)),
                    None => self.value_error("substring not found"),
                }
            }
            "count" => {
                self.arity(name, &args, 1, 1)?;
                let needle = self.str_arg(name, &args[0])?;
                let n = if needle.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(needle.as_ref()).count()
                };
                Ok(Value::Int(n as i64))
            }
            "isdigit" | "isalpha" | "isalnum" | "isspace" => {
                self.arity(name, &args, 0, 0)?;
                let test: fn(char) -> bool = match name {
                    "isdigit" => |c| c.is_ascii_digit(),
                    "isalpha" => char::is_alphabetic,
                    "isalnum" => char::is_alphanumeric,
                    _ => char::is_whitespace,
                };
                Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
            }
            "isupper" | "islower" => {
                self.arity(name, &args, 0, 0)?;
                let cased: Vec<char> = s.chars().filter(|c| c.is_alphabetic() && (c.is_uppercase() || c.is_lowercase())).collect();
                let ok = !cased.is_empty()
                    && cased.iter().all(|c| if name == "isupper" { c.is_uppercase() } else { c.is_lowercase() });
                Ok(Value::Bool(ok))
            }
            "title" => {
                self.arity(name, &args, 0, 0)?;
                let mut out = String::with_capacity(s.len());
                let mut boundary = true;
                for c in s.chars() {
                    if c.is_alphabetic() {
                        if boundary {
                            out.extend(c.to_uppercase());
                        } else {
                            out.extend(c.to_lowercase());
                        }
                        boundary = false;
                    } else {
                        out.push(c);
                        boundary = true;
                    }
                }
                text(out)
            }
            "capitalize" => {
                self.arity(name, &args, 0, 0)?;
                let mut chars = s.chars();
                let out = match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                };
                text(out)
            }
            "ljust" | "rjust" | "center" | "zfill" => {
                let (min, max) = if name == "zfill" { (1, 1) } else { (1, 2) };
                self.arity(name, &args, min, max)?;
                let Some(width) = args[0].as_int() else {
                    return self.type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        self.type_name(&args[0])
                    ));
                };
                let fill = match args.get(1) {
                    Some(v) => {
                        let f = self.str_arg(name, v)?;
                        let mut chars = f.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => return self.type_error("The fill character must be exactly one character long"),
                        }
                    }
                    None => ' ',
                };
                let len = s.chars().count();
                let width = width.max(0) as usize;
                self.check_len(width)?;
                if width <= len {
                    return Ok(Value::Str(s));
                }
                let gap = width - len;
                let fill_str = |n: usize| fill.to_string().repeat(n);
                let out = match name {
                    "ljust" => format!("{}{}", s, fill_str(gap)),
                    "rjust" => format!("{}{}", fill_str(gap), s),
                    "center" => {
                        let left = gap / 2 + (gap & width & 1);
                        format!("{}{}{}", fill_str(left), s, fill_str(gap - left))
                    }
                    _ => match s.strip_prefix(['-', '+']) {
                        Some(rest) => format!("{}{}{}", &s[..1], "0".repeat(gap), rest),
                        None => format!("{}{}", "0".repeat(gap), s),
                    },
                };
                text(out)
            }
            "format" => {
                let formatted = self.str_format(&s, &args, &kwargs)?;
                text(formatted)
            }
            _ => self.missing_method("str", name),
        }
    }
}
