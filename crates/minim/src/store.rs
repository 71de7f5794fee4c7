use ahash::AHashMap;
use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use crate::value::{ArrayData, Func, Kind, List, Object, Pair, Pointer, Span, Value};

/// Nesting depth cap for deep extraction and planting. Aliasing through
/// lvalue indexing can tie a container into itself; extraction cuts off at
/// this depth and yields noth.
pub(crate) const MAX_DEPTH: usize = 64;

/// One indirection cell: which arena, and where in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub kind: Kind,
    pub index: usize,
}

/// A per-interpreter value store: one arena per kind, a slot table
/// indirecting into the arenas, and a name table mapping variables to slots.
///
/// All allocation goes through here. Containers compose by slot indices:
/// storing a value into a container allocates a fresh slot for it, so two
/// containers can share an element slot and the collector can preserve that
/// sharing.
#[derive(Debug, Clone)]
pub(crate) struct Store {
    /// Interpreter id; pointers carry it so cross-interpreter references can
    /// be told apart from local ones.
    pub id: u64,
    pub names: AHashMap<String, usize>,
    pub slots: Vec<Slot>,
    pub ints: Vec<BigInt>,
    pub floats: Vec<BigDecimal>,
    pub strs: Vec<String>,
    pub bools: Vec<bool>,
    pub bytes: Vec<u8>,
    pub funcs: Vec<Func>,
    pub ids: Vec<Pointer>,
    pub arrs: Vec<ArrayData>,
    pub spans: Vec<Span>,
    pub lists: Vec<List>,
    pub pairs: Vec<Pair>,
    /// Collection bookkeeping: actions since the last collection, the cycle
    /// gate, and the live slot count recorded after the last collection.
    pub gc_cycle: u32,
    pub gc_max: u32,
    pub last_live: usize,
}

impl Store {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            names: AHashMap::new(),
            slots: Vec::new(),
            ints: Vec::new(),
            floats: Vec::new(),
            strs: Vec::new(),
            bools: Vec::new(),
            bytes: Vec::new(),
            funcs: Vec::new(),
            ids: Vec::new(),
            arrs: Vec::new(),
            spans: Vec::new(),
            lists: Vec::new(),
            pairs: Vec::new(),
            gc_cycle: 0,
            gc_max: 100,
            last_live: 0,
        }
    }

    #[must_use]
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.slot_of(name).map(|s| self.slots[s].kind)
    }

    /// Appends a fresh arena entry for `value` and returns its index in the
    /// matching arena.
    fn push_arena(&mut self, value: Value) -> usize {
        match value {
            Value::Noth => 0,
            Value::Int(v) => {
                self.ints.push(v);
                self.ints.len() - 1
            }
            Value::Float(v) => {
                self.floats.push(v);
                self.floats.len() - 1
            }
            Value::Str(v) => {
                self.strs.push(v);
                self.strs.len() - 1
            }
            Value::Bool(v) => {
                self.bools.push(v);
                self.bools.len() - 1
            }
            Value::Byte(v) => {
                self.bytes.push(v);
                self.bytes.len() - 1
            }
            Value::Func(v) => {
                self.funcs.push(v);
                self.funcs.len() - 1
            }
            Value::Id(v) => {
                self.ids.push(v);
                self.ids.len() - 1
            }
            Value::Arr(v) => {
                self.arrs.push(v);
                self.arrs.len() - 1
            }
            Value::Span(v) => {
                self.spans.push(v);
                self.spans.len() - 1
            }
            Value::List(v) => {
                self.lists.push(v);
                self.lists.len() - 1
            }
            Value::Pair(v) => {
                self.pairs.push(v);
                self.pairs.len() - 1
            }
        }
    }

    /// Overwrites the arena entry a slot points at. The caller must have
    /// checked that the kinds match.
    fn overwrite_arena(&mut self, slot: Slot, value: Value) {
        match value {
            Value::Noth => {}
            Value::Int(v) => self.ints[slot.index] = v,
            Value::Float(v) => self.floats[slot.index] = v,
            Value::Str(v) => self.strs[slot.index] = v,
            Value::Bool(v) => self.bools[slot.index] = v,
            Value::Byte(v) => self.bytes[slot.index] = v,
            Value::Func(v) => self.funcs[slot.index] = v,
            Value::Id(v) => self.ids[slot.index] = v,
            Value::Arr(v) => self.arrs[slot.index] = v,
            Value::Span(v) => self.spans[slot.index] = v,
            Value::List(v) => self.lists[slot.index] = v,
            Value::Pair(v) => self.pairs[slot.index] = v,
        }
    }

    /// Allocates a fresh slot holding `value` and returns its index.
    pub fn alloc(&mut self, value: Value) -> usize {
        let kind = value.kind();
        let index = self.push_arena(value);
        self.slots.push(Slot { kind, index });
        self.slots.len() - 1
    }

    /// Binds `name` to `value`: a reassignment that keeps the kind writes the
    /// arena entry in place; a kind change allocates a new slot and rebinds
    /// the name (the old entry becomes collectable).
    pub fn save(&mut self, name: &str, value: Value) {
        if let Some(&slot_idx) = self.names.get(name) {
            let slot = self.slots[slot_idx];
            if slot.kind == value.kind() {
                self.overwrite_arena(slot, value);
                return;
            }
        }
        let slot = self.alloc(value);
        self.names.insert(name.to_owned(), slot);
    }

    /// Writes `value` through an existing slot. A kind change rewrites the
    /// slot entry in place, keeping the slot index valid for every referer.
    pub fn write_slot(&mut self, slot_idx: usize, value: Value) {
        let slot = self.slots[slot_idx];
        if slot.kind == value.kind() {
            self.overwrite_arena(slot, value);
        } else {
            let kind = value.kind();
            let index = self.push_arena(value);
            self.slots[slot_idx] = Slot { kind, index };
        }
    }

    /// Shallow read of a slot: clones the arena entry.
    #[must_use]
    pub fn value_at(&self, slot_idx: usize) -> Value {
        let slot = self.slots[slot_idx];
        match slot.kind {
            Kind::Noth => Value::Noth,
            Kind::Int => Value::Int(self.ints[slot.index].clone()),
            Kind::Float => Value::Float(self.floats[slot.index].clone()),
            Kind::Str => Value::Str(self.strs[slot.index].clone()),
            Kind::Bool => Value::Bool(self.bools[slot.index]),
            Kind::Byte => Value::Byte(self.bytes[slot.index]),
            Kind::Func => Value::Func(self.funcs[slot.index].clone()),
            Kind::Id => Value::Id(self.ids[slot.index]),
            Kind::Arr => Value::Arr(self.arrs[slot.index].clone()),
            Kind::Span => Value::Span(self.spans[slot.index]),
            Kind::List => Value::List(self.lists[slot.index].clone()),
            Kind::Pair => Value::Pair(self.pairs[slot.index].clone()),
        }
    }

    /// Shallow read by name. Returns `None` for unknown names; the evaluator
    /// has already materialised noth for names it allows to be missing.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<Value> {
        self.slot_of(name).map(|s| self.value_at(s))
    }

    /// Reads one scalar out of a typed arena, for span iteration.
    #[must_use]
    pub fn arena_scalar(&self, dtype: Kind, index: usize) -> Option<Value> {
        Some(match dtype {
            Kind::Int => Value::Int(self.ints.get(index)?.clone()),
            Kind::Float => Value::Float(self.floats.get(index)?.clone()),
            Kind::Str => Value::Str(self.strs.get(index)?.clone()),
            Kind::Bool => Value::Bool(*self.bools.get(index)?),
            Kind::Byte => Value::Byte(*self.bytes.get(index)?),
            _ => return None,
        })
    }

    /// Deep-extracts a slot into a self-contained [`Object`]. Spans
    /// materialise as typed arrays; pointers come out unchanged. Cycles (or
    /// pathological nesting) cut off as noth at [`MAX_DEPTH`].
    #[must_use]
    pub fn extract(&self, slot_idx: usize) -> Object {
        self.extract_at(slot_idx, 0)
    }

    fn extract_at(&self, slot_idx: usize, depth: usize) -> Object {
        if depth > MAX_DEPTH || slot_idx >= self.slots.len() {
            return Object::Noth;
        }
        let slot = self.slots[slot_idx];
        match slot.kind {
            Kind::Noth => Object::Noth,
            Kind::Int => Object::Int(self.ints[slot.index].clone()),
            Kind::Float => Object::Float(self.floats[slot.index].clone()),
            Kind::Str => Object::Str(self.strs[slot.index].clone()),
            Kind::Bool => Object::Bool(self.bools[slot.index]),
            Kind::Byte => Object::Byte(self.bytes[slot.index]),
            Kind::Func => Object::Func(self.funcs[slot.index].clone()),
            Kind::Id => Object::Id(self.ids[slot.index]),
            Kind::Arr => Object::Arr(self.arrs[slot.index].clone()),
            Kind::Span => {
                let span = self.spans[slot.index];
                let mut arr = ArrayData::empty(span.dtype);
                for n in span.start..span.start + span.length {
                    if let Some(value) = self.arena_scalar(span.dtype, n) {
                        arr.push(&value_to_scalar_object(value));
                    }
                }
                Object::Arr(arr)
            }
            Kind::List => {
                let list = self.lists[slot.index].clone();
                let items = list
                    .ids
                    .iter()
                    .map(|ptr| {
                        if ptr.interp == self.id {
                            self.extract_at(ptr.addr, depth + 1)
                        } else {
                            Object::Id(*ptr)
                        }
                    })
                    .collect();
                Object::List(items)
            }
            Kind::Pair => {
                let pair = self.pairs[slot.index].clone();
                let entries = pair
                    .ids
                    .iter()
                    .map(|(key, ptr)| {
                        let value = if ptr.interp == self.id {
                            self.extract_at(ptr.addr, depth + 1)
                        } else {
                            Object::Id(*ptr)
                        };
                        (key.clone(), value)
                    })
                    .collect();
                Object::Pair(entries)
            }
        }
    }

    /// Deep read by name.
    #[must_use]
    pub fn extract_of(&self, name: &str) -> Option<Object> {
        self.slot_of(name).map(|s| self.extract(s))
    }

    /// Plants a deep object into this store, allocating fresh slots for
    /// every container element, and returns the shallow value for the root.
    pub fn value_from(&mut self, obj: &Object) -> Value {
        self.value_from_at(obj, 0)
    }

    fn value_from_at(&mut self, obj: &Object, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            return Value::Noth;
        }
        match obj {
            Object::Noth => Value::Noth,
            Object::Int(v) => Value::Int(v.clone()),
            Object::Float(v) => Value::Float(v.clone()),
            Object::Str(v) => Value::Str(v.clone()),
            Object::Bool(v) => Value::Bool(*v),
            Object::Byte(v) => Value::Byte(*v),
            Object::Func(v) => Value::Func(v.clone()),
            Object::Id(v) => Value::Id(*v),
            Object::Arr(v) => Value::Arr(v.clone()),
            Object::List(items) => {
                let mut list = List::default();
                for item in items {
                    let value = self.value_from_at(item, depth + 1);
                    let slot = self.alloc(value);
                    list.ids.push(Pointer::new(slot, self.id));
                }
                Value::List(list)
            }
            Object::Pair(entries) => {
                let mut pair = Pair::default();
                for (key, item) in entries {
                    let value = self.value_from_at(item, depth + 1);
                    let slot = self.alloc(value);
                    pair.ids.insert(key.clone(), Pointer::new(slot, self.id));
                }
                Value::Pair(pair)
            }
        }
    }

    /// Deep write by name: plants the object and binds the name to it.
    pub fn save_object(&mut self, name: &str, obj: &Object) {
        let value = self.value_from(obj);
        self.save(name, value);
    }

    /// Renders a named value for display.
    #[must_use]
    pub fn render_of(&self, name: &str) -> String {
        self.extract_of(name).unwrap_or(Object::Noth).render()
    }

    pub fn remove_name(&mut self, name: &str) {
        self.names.remove(name);
    }
}

/// Converts a scalar shallow value into its object form. Containers are not
/// expected here (spans only view scalar arenas).
fn value_to_scalar_object(value: Value) -> Object {
    match value {
        Value::Int(v) => Object::Int(v),
        Value::Float(v) => Object::Float(v),
        Value::Str(v) => Object::Str(v),
        Value::Bool(v) => Object::Bool(v),
        Value::Byte(v) => Object::Byte(v),
        _ => Object::Noth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::new(1)
    }

    #[test]
    fn save_same_kind_overwrites_in_place() {
        let mut s = store();
        s.save("x", Value::Int(BigInt::from(1)));
        let slot = s.slot_of("x").unwrap();
        s.save("x", Value::Int(BigInt::from(2)));
        assert_eq!(s.slot_of("x").unwrap(), slot, "slot must be stable");
        assert_eq!(s.ints[s.slots[slot].index], BigInt::from(2));
    }

    #[test]
    fn save_kind_change_allocates_new_slot() {
        let mut s = store();
        s.save("x", Value::Int(BigInt::from(1)));
        let old_slot = s.slot_of("x").unwrap();
        s.save("x", Value::Str("now a string".to_owned()));
        let new_slot = s.slot_of("x").unwrap();
        assert_ne!(old_slot, new_slot);
        assert_eq!(s.kind_of("x"), Some(Kind::Str));
    }

    #[test]
    fn noth_is_defined_but_valueless() {
        let mut s = store();
        s.save("n", Value::Noth);
        assert_eq!(s.kind_of("n"), Some(Kind::Noth));
        assert_eq!(s.render_of("n"), "Nothing");
    }

    #[test]
    fn containers_compose_by_slots() {
        let mut s = store();
        let obj = Object::List(vec![
            Object::Int(BigInt::from(1)),
            Object::List(vec![Object::Int(BigInt::from(2))]),
        ]);
        s.save_object("l", &obj);
        let extracted = s.extract_of("l").unwrap();
        assert_eq!(extracted, obj);
    }

    #[test]
    fn write_slot_survives_kind_change() {
        let mut s = store();
        s.save("x", Value::Int(BigInt::from(1)));
        let slot = s.slot_of("x").unwrap();
        s.write_slot(slot, Value::Str("swapped".to_owned()));
        assert_eq!(s.kind_of("x"), Some(Kind::Str));
        assert_eq!(s.render_of("x"), "swapped");
    }

    #[test]
    fn span_extracts_as_typed_array() {
        let mut s = store();
        for n in 0..3 {
            s.ints.push(BigInt::from(n));
        }
        let slot = s.alloc(Value::Span(Span {
            dtype: Kind::Int,
            start: 0,
            length: 3,
        }));
        assert_eq!(s.extract(slot).repr(), "int.[0, 1, 2]");
    }

    #[test]
    fn self_referential_list_extraction_terminates() {
        let mut s = store();
        s.save_object("l", &Object::List(vec![Object::Int(BigInt::from(1))]));
        let root_slot = s.slot_of("l").unwrap();
        let elem = {
            let Value::List(list) = s.value_at(root_slot) else {
                panic!("expected list")
            };
            list.ids[0]
        };
        // tie the knot: the element now holds the list itself
        let list_value = s.value_at(root_slot);
        s.write_slot(elem.addr, list_value);
        // must not hang or overflow
        let _ = s.extract(root_slot);
    }
}
