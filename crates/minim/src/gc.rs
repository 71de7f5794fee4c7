use ahash::AHashMap;
use log::debug;

use crate::{
    store::{Slot, Store},
    value::{Kind, List, Pair, Pointer, Span},
};

/// Evaluator-private temporaries are not collection roots; they survive only
/// through being referenced from a non-temporary name.
fn is_root_name(name: &str) -> bool {
    !name.starts_with("_temp_")
}

impl Store {
    /// Counts one evaluator step toward the collection gate and collects
    /// when either the cycle counter reaches its maximum or the slot
    /// population has grown more than 20% past the last post-collection
    /// size.
    pub fn gc_tick(&mut self) {
        self.gc_cycle += 1;
        let grown = self.last_live > 0 && self.slots.len() > self.last_live + self.last_live / 5;
        if self.gc_cycle >= self.gc_max || grown {
            self.collect();
        }
    }

    /// Stop-the-world copying collection over this store's arenas.
    ///
    /// Every root (non-temporary name) is copied into a fresh store; list,
    /// pair and span contents are traced recursively. The old-slot to
    /// new-slot mapping is memoised for every copied slot, so shared element
    /// slots stay shared and self-pointers can be remapped afterwards.
    /// Pointers into other interpreters are copied unchanged; dangling
    /// self-pointers become nil.
    pub fn collect(&mut self) {
        let old = &*self;
        let mut new = Self::new(old.id);
        new.gc_max = old.gc_max;
        let mut slot_map: AHashMap<usize, usize> = AHashMap::new();

        let mut roots: Vec<(String, usize)> = old
            .names
            .iter()
            .filter(|(name, _)| is_root_name(name))
            .map(|(name, slot)| (name.clone(), *slot))
            .collect();
        // deterministic trace order keeps collections reproducible
        roots.sort();
        for (name, slot) in roots {
            let new_slot = copy_slot(old, &mut new, &mut slot_map, slot);
            new.names.insert(name, new_slot);
        }

        // remap self-pointers through the slot map now that it is complete;
        // unvisited targets were unreachable, so those pointers go nil
        for ptr in &mut new.ids {
            if ptr.interp == old.id && !ptr.is_nil() {
                match slot_map.get(&ptr.addr) {
                    Some(&addr) => ptr.addr = addr,
                    None => *ptr = Pointer::NIL,
                }
            }
        }

        debug!(
            "gc: interp {id} copied {live} of {total} slots",
            id = old.id,
            live = new.slots.len(),
            total = old.slots.len(),
        );
        new.last_live = new.slots.len();
        *self = new;
    }
}

/// Copies one slot (and, for containers, everything it references) from
/// `old` into `new`, memoising the old-to-new slot mapping.
///
/// Containers reserve their slot before recursing so knots tied through
/// lvalue aliasing terminate.
fn copy_slot(old: &Store, new: &mut Store, slot_map: &mut AHashMap<usize, usize>, idx: usize) -> usize {
    if let Some(&mapped) = slot_map.get(&idx) {
        return mapped;
    }
    let slot = old.slots[idx];
    match slot.kind {
        Kind::Noth
        | Kind::Int
        | Kind::Float
        | Kind::Str
        | Kind::Bool
        | Kind::Byte
        | Kind::Func
        | Kind::Arr
        | Kind::Id => {
            let new_idx = new.alloc(old.value_at(idx));
            slot_map.insert(idx, new_idx);
            new_idx
        }
        Kind::Span => {
            let span = old.spans[slot.index];
            let new_span = copy_span(old, new, span);
            let new_idx = new.alloc(crate::value::Value::Span(new_span));
            slot_map.insert(idx, new_idx);
            new_idx
        }
        Kind::List => {
            let new_idx = reserve(new, Kind::List);
            slot_map.insert(idx, new_idx);
            let list = old.lists[slot.index].clone();
            let mut copied = List::default();
            for ptr in &list.ids {
                copied.ids.push(copy_element(old, new, slot_map, *ptr));
            }
            new.lists.push(copied);
            new.slots[new_idx].index = new.lists.len() - 1;
            new_idx
        }
        Kind::Pair => {
            let new_idx = reserve(new, Kind::Pair);
            slot_map.insert(idx, new_idx);
            let pair = old.pairs[slot.index].clone();
            let mut copied = Pair::default();
            for (key, ptr) in &pair.ids {
                copied
                    .ids
                    .insert(key.clone(), copy_element(old, new, slot_map, *ptr));
            }
            new.pairs.push(copied);
            new.slots[new_idx].index = new.pairs.len() - 1;
            new_idx
        }
    }
}

/// Pushes a placeholder slot for a container about to be traced.
fn reserve(new: &mut Store, kind: Kind) -> usize {
    new.slots.push(Slot {
        kind,
        index: usize::MAX,
    });
    new.slots.len() - 1
}

/// Copies one container element pointer: local pointers trace their target
/// slot, foreign pointers are copied unchanged.
fn copy_element(old: &Store, new: &mut Store, slot_map: &mut AHashMap<usize, usize>, ptr: Pointer) -> Pointer {
    if ptr.interp == old.id && ptr.addr < old.slots.len() {
        Pointer::new(copy_slot(old, new, slot_map, ptr.addr), old.id)
    } else {
        ptr
    }
}

/// Copies the arena range a span views into the new store's arena.
fn copy_span(old: &Store, new: &mut Store, span: Span) -> Span {
    let mut copied = Span {
        dtype: span.dtype,
        start: 0,
        length: span.length,
    };
    match span.dtype {
        Kind::Int => {
            copied.start = new.ints.len();
            new.ints
                .extend_from_slice(&old.ints[span.start..span.start + span.length]);
        }
        Kind::Float => {
            copied.start = new.floats.len();
            new.floats
                .extend_from_slice(&old.floats[span.start..span.start + span.length]);
        }
        Kind::Str => {
            copied.start = new.strs.len();
            new.strs
                .extend_from_slice(&old.strs[span.start..span.start + span.length]);
        }
        Kind::Bool => {
            copied.start = new.bools.len();
            new.bools
                .extend_from_slice(&old.bools[span.start..span.start + span.length]);
        }
        Kind::Byte => {
            copied.start = new.bytes.len();
            new.bytes
                .extend_from_slice(&old.bytes[span.start..span.start + span.length]);
        }
        _ => copied.length = 0,
    }
    copied
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;
    use crate::value::{Object, Value};

    fn int_obj(n: i64) -> Object {
        Object::Int(BigInt::from(n))
    }

    #[test]
    fn named_values_survive_collection_structurally() {
        let mut s = Store::new(7);
        s.save("x", Value::Int(BigInt::from(42)));
        s.save("s", Value::Str("keep".to_owned()));
        let nested = Object::List(vec![
            int_obj(1),
            Object::Pair(vec![("str:k".to_owned(), int_obj(2))]),
        ]);
        s.save_object("l", &nested);
        let before: Vec<Object> = ["x", "s", "l"].iter().map(|n| s.extract_of(n).unwrap()).collect();
        s.collect();
        let after: Vec<Object> = ["x", "s", "l"].iter().map(|n| s.extract_of(n).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn temporaries_are_not_roots() {
        let mut s = Store::new(7);
        s.save("_temp_0", Value::Int(BigInt::from(1)));
        s.save("keep", Value::Int(BigInt::from(2)));
        s.collect();
        assert!(s.slot_of("_temp_0").is_none());
        assert!(s.slot_of("keep").is_some());
    }

    #[test]
    fn collection_is_idempotent_on_the_reachable_set() {
        let mut s = Store::new(7);
        s.save_object("l", &Object::List(vec![int_obj(1), int_obj(2)]));
        s.save("x", Value::Float("2.5".parse().unwrap()));
        s.collect();
        let first_slots = s.slots.len();
        let first = s.extract_of("l").unwrap();
        s.collect();
        assert_eq!(s.slots.len(), first_slots, "second collection must be a no-op");
        assert_eq!(s.extract_of("l").unwrap(), first);
    }

    #[test]
    fn shared_element_slots_stay_shared() {
        let mut s = Store::new(7);
        s.save_object("l", &Object::List(vec![int_obj(5)]));
        let root = s.slot_of("l").unwrap();
        let Value::List(list) = s.value_at(root) else { panic!("list") };
        let elem = list.ids[0];
        // a second list sharing the same element slot
        s.save("m", Value::List(List { ids: vec![elem] }));
        s.collect();
        let l_root = s.slot_of("l").unwrap();
        let m_root = s.slot_of("m").unwrap();
        let Value::List(l) = s.value_at(l_root) else { panic!("list") };
        let Value::List(m) = s.value_at(m_root) else { panic!("list") };
        assert_eq!(l.ids[0], m.ids[0], "sharing must be preserved");
    }

    #[test]
    fn live_self_pointer_is_remapped() {
        let mut s = Store::new(7);
        s.save("x", Value::Int(BigInt::from(9)));
        let target = s.slot_of("x").unwrap();
        s.save("p", Value::Id(Pointer::new(target, 7)));
        s.collect();
        let p_slot = s.slot_of("p").unwrap();
        let Value::Id(ptr) = s.value_at(p_slot) else { panic!("id") };
        assert!(!ptr.is_nil());
        assert_eq!(s.extract(ptr.addr), int_obj(9));
    }

    #[test]
    fn dangling_self_pointer_goes_nil() {
        let mut s = Store::new(7);
        let dead = s.alloc(Value::Int(BigInt::from(1)));
        s.save("p", Value::Id(Pointer::new(dead, 7)));
        // nothing roots the target slot
        s.collect();
        let p_slot = s.slot_of("p").unwrap();
        let Value::Id(ptr) = s.value_at(p_slot) else { panic!("id") };
        assert!(ptr.is_nil());
    }

    #[test]
    fn foreign_pointer_is_copied_unchanged() {
        let mut s = Store::new(7);
        let foreign = Pointer::new(123, 99);
        s.save("p", Value::Id(foreign));
        s.collect();
        let p_slot = s.slot_of("p").unwrap();
        let Value::Id(ptr) = s.value_at(p_slot) else { panic!("id") };
        assert_eq!(ptr, foreign);
    }

    #[test]
    fn pointer_into_container_element_survives() {
        let mut s = Store::new(7);
        s.save_object("l", &Object::List(vec![int_obj(4)]));
        let root = s.slot_of("l").unwrap();
        let Value::List(list) = s.value_at(root) else { panic!("list") };
        s.save("p", Value::Id(list.ids[0]));
        s.collect();
        let p_slot = s.slot_of("p").unwrap();
        let Value::Id(ptr) = s.value_at(p_slot) else { panic!("id") };
        assert!(!ptr.is_nil(), "element-slot pointer must survive");
        assert_eq!(s.extract(ptr.addr), int_obj(4));
    }

    #[test]
    fn spans_copy_their_viewed_range() {
        let mut s = Store::new(7);
        for n in 0..4 {
            s.ints.push(BigInt::from(n * 10));
        }
        s.save(
            "sp",
            Value::Span(Span {
                dtype: Kind::Int,
                start: 1,
                length: 2,
            }),
        );
        let before = s.extract_of("sp").unwrap();
        s.collect();
        assert_eq!(s.extract_of("sp").unwrap(), before);
        assert_eq!(before.repr(), "int.[10, 20]");
    }

    #[test]
    fn growth_trigger_collects() {
        let mut s = Store::new(7);
        s.save("keep", Value::Int(BigInt::from(1)));
        s.collect();
        let baseline = s.slots.len();
        for _ in 0..baseline * 2 + 8 {
            s.alloc(Value::Int(BigInt::from(0)));
        }
        s.gc_tick();
        assert_eq!(s.slots.len(), baseline, "garbage must be gone after growth trigger");
    }
}
