/// Heap graph snapshots of the evaluator's live objects.
///
/// Composite objects are keyed by their allocation serial, so two bindings
/// that alias one object resolve to the same [`HeapId`]. Objects are marked
/// visited before their children are expanded and expansion runs off an
/// explicit worklist, which keeps cyclic and deeply nested structures safe.
use crate::config::types::{
    Frame, HeapId, HeapObject, HeapSnapshot, HeapValue, MapEntry, Scalar, ValueRef,
};
use crate::runtime::interpreter::FrameState;
use crate::runtime::value::{Builtin, Heap, ObjId, Object, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Type tag of values recorded by description only.
pub const OPAQUE_TAG: &str = "<opaque>";

pub struct HeapGraphBuilder<'h> {
    heap: &'h Heap,
    visited: HashSet<ObjId>,
    worklist: Vec<ObjId>,
    objects: BTreeMap<HeapId, HeapObject>,
}

impl<'h> HeapGraphBuilder<'h> {
    pub fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            visited: HashSet::new(),
            worklist: Vec::new(),
            objects: BTreeMap::new(),
        }
    }

    /// Walk the call stack: frame bindings plus the snapshot they reference.
    pub fn build(heap: &'h Heap, frames: &[FrameState]) -> (Vec<Frame>, HeapSnapshot) {
        let mut builder = Self::new(heap);
        let stack = frames
            .iter()
            .map(|frame| {
                let bindings = frame
                    .scope
                    .borrow()
                    .iter()
                    .map(|(name, value)| (name.clone(), builder.reference(value)))
                    .collect();
                Frame {
                    function_name: frame.name.to_string(),
                    line_number: frame.line,
                    bindings,
                }
            })
            .collect();
        (stack, builder.finish())
    }

    /// Inline scalars; register everything else and return its id.
    pub fn reference(&mut self, value: &Value) -> ValueRef {
        match value {
            Value::None => ValueRef::Scalar(Scalar::None),
            Value::Bool(b) => ValueRef::Scalar(Scalar::Bool(*b)),
            Value::Int(i) => ValueRef::Scalar(Scalar::Int(*i)),
            Value::Float(x) => ValueRef::Scalar(Scalar::Float(*x)),
            Value::Str(s) => ValueRef::Scalar(Scalar::Str(s.to_string())),
            Value::Builtin(builtin) => {
                let id = HeapId(format!("builtin:{}", builtin_name(builtin)));
                if !self.objects.contains_key(&id) {
                    let object = opaque(self.heap.describe_opaque(value));
                    self.objects.insert(id.clone(), object);
                }
                ValueRef::Ref { id }
            }
            Value::Obj(obj) => {
                if self.visited.insert(*obj) {
                    self.worklist.push(*obj);
                }
                ValueRef::Ref { id: object_id(*obj) }
            }
        }
    }

    /// Expand every pending object and return the snapshot.
    pub fn finish(mut self) -> HeapSnapshot {
        while let Some(obj) = self.worklist.pop() {
            let object = self.expand(obj);
            self.objects.insert(object_id(obj), object);
        }
        HeapSnapshot {
            objects: self.objects,
        }
    }

    fn expand(&mut self, obj: ObjId) -> HeapObject {
        let heap = self.heap;
        let (type_tag, value) = match heap.get(obj) {
            Object::List(items) => ("list".to_string(), self.sequence(items.iter())),
            Object::Tuple(items) => ("tuple".to_string(), self.sequence(items.iter())),
            Object::Set(items) => ("set".to_string(), self.sequence(items.iter())),
            Object::Dict(pairs) => {
                let entries = pairs
                    .iter()
                    .map(|(k, v)| MapEntry {
                        key: self.reference(k),
                        value: self.reference(v),
                    })
                    .collect();
                ("dict".to_string(), HeapValue::Mapping(entries))
            }
            Object::Instance { class, attrs, .. } => {
                let entries = attrs
                    .iter()
                    .map(|(name, v)| MapEntry {
                        key: ValueRef::Scalar(Scalar::Str(name.clone())),
                        value: self.reference(v),
                    })
                    .collect();
                (heap.class_name(*class).to_string(), HeapValue::Mapping(entries))
            }
            _ => return opaque(heap.describe_opaque(&Value::Obj(obj))),
        };
        let outgoing_refs = children(&value);
        HeapObject {
            type_tag,
            value,
            outgoing_refs,
        }
    }

    fn sequence<'v>(&mut self, items: impl Iterator<Item = &'v Value>) -> HeapValue {
        HeapValue::Sequence(items.map(|v| self.reference(v)).collect())
    }
}

fn object_id(obj: ObjId) -> HeapId {
    HeapId(format!("obj{}", obj.serial()))
}

fn builtin_name(builtin: &Builtin) -> &'static str {
    match builtin {
        Builtin::Function(f) => f.name(),
        Builtin::Type(t) => t.name(),
        Builtin::Exception(k) => k.name(),
    }
}

fn opaque(description: String) -> HeapObject {
    HeapObject {
        type_tag: OPAQUE_TAG.to_string(),
        value: HeapValue::Scalar(Scalar::Str(description)),
        outgoing_refs: BTreeSet::new(),
    }
}

fn children(value: &HeapValue) -> BTreeSet<HeapId> {
    let mut refs = BTreeSet::new();
    match value {
        HeapValue::Scalar(_) => {}
        HeapValue::Sequence(items) => {
            refs.extend(items.iter().filter_map(ValueRef::heap_id).cloned());
        }
        HeapValue::Mapping(entries) => {
            for entry in entries {
                refs.extend(entry.key.heap_id().cloned());
                refs.extend(entry.value.heap_id().cloned());
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Class;

    fn list(heap: &mut Heap, items: Vec<Value>) -> Value {
        Value::Obj(heap.alloc(Object::List(items)).unwrap())
    }

    fn assert_closed(snapshot: &HeapSnapshot) {
        for object in snapshot.objects.values() {
            for id in &object.outgoing_refs {
                assert!(snapshot.get(id).is_some(), "dangling {}", id);
            }
        }
    }

    #[test]
    fn scalars_are_inlined() {
        let heap = Heap::new(10);
        let mut builder = HeapGraphBuilder::new(&heap);
        assert_eq!(builder.reference(&Value::Int(3)), ValueRef::Scalar(Scalar::Int(3)));
        assert_eq!(
            builder.reference(&Value::str("hi")),
            ValueRef::Scalar(Scalar::Str("hi".into()))
        );
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn nested_lists_are_closed_and_aliases_shared() {
        let mut heap = Heap::new(10);
        let inner = list(&mut heap, vec![Value::Int(1)]);
        let outer = list(&mut heap, vec![inner.clone(), inner.clone()]);
        let mut builder = HeapGraphBuilder::new(&heap);
        let a = builder.reference(&outer);
        let b = builder.reference(&outer);
        let snapshot = builder.finish();
        assert_eq!(a, b);
        assert_eq!(snapshot.len(), 2);
        assert_closed(&snapshot);
        let outer_obj = snapshot.get(a.heap_id().unwrap()).unwrap();
        assert_eq!(outer_obj.outgoing_refs.len(), 1);
    }

    #[test]
    fn self_reference_terminates_with_one_object() {
        let mut heap = Heap::new(10);
        let id = heap.alloc(Object::List(Vec::new())).unwrap();
        if let Object::List(items) = heap.get_mut(id) {
            items.push(Value::Obj(id));
        }
        let mut builder = HeapGraphBuilder::new(&heap);
        let r = builder.reference(&Value::Obj(id));
        let snapshot = builder.finish();
        assert_eq!(snapshot.len(), 1);
        let own = r.heap_id().unwrap();
        assert!(snapshot.get(own).unwrap().outgoing_refs.contains(own));
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let mut heap = Heap::new(200_000);
        let mut value = Value::None;
        for _ in 0..100_000 {
            value = list(&mut heap, vec![value]);
        }
        let mut builder = HeapGraphBuilder::new(&heap);
        builder.reference(&value);
        let snapshot = builder.finish();
        assert_eq!(snapshot.len(), 100_000);
        assert_closed(&snapshot);
    }

    #[test]
    fn instances_map_attributes_and_classes_are_opaque() {
        let mut heap = Heap::new(10);
        let class = heap
            .alloc(Object::Class(Class {
                name: "Node".to_string(),
                base: None,
                attrs: BTreeMap::new(),
            }))
            .unwrap();
        let node = heap
            .alloc(Object::Instance {
                class,
                attrs: BTreeMap::new(),
                exc_message: None,
            })
            .unwrap();
        if let Object::Instance { attrs, .. } = heap.get_mut(node) {
            attrs.insert("next".to_string(), Value::Obj(node));
            attrs.insert("cls".to_string(), Value::Obj(class));
        }
        let mut builder = HeapGraphBuilder::new(&heap);
        let r = builder.reference(&Value::Obj(node));
        let snapshot = builder.finish();
        let object = snapshot.get(r.heap_id().unwrap()).unwrap();
        assert_eq!(object.type_tag, "Node");
        assert_eq!(snapshot.len(), 2);
        let class_obj = snapshot.get(&object_id(class)).unwrap();
        assert_eq!(class_obj.type_tag, OPAQUE_TAG);
        assert_eq!(
            class_obj.value,
            HeapValue::Scalar(Scalar::Str("<class '__main__.Node'>".into()))
        );
    }
}
