use std::fmt;

use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use num_bigint::BigInt;
use strum::{Display, EnumString, IntoStaticStr};

/// The twelve value kinds of the language.
///
/// The discriminant order is significant: byte literals written as `b.<n>`
/// in array headers select a kind by this numbering, and the slot table
/// stores a `Kind` next to every arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Kind {
    Noth = 0,
    Int = 1,
    Float = 2,
    Str = 3,
    Arr = 4,
    List = 5,
    Pair = 6,
    Bool = 7,
    Byte = 8,
    Func = 9,
    Id = 10,
    Span = 11,
}

impl Kind {
    /// Maps the numeric form used by `b.<n>` typed-array headers back to a kind.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Noth,
            1 => Self::Int,
            2 => Self::Float,
            3 => Self::Str,
            4 => Self::Arr,
            5 => Self::List,
            6 => Self::Pair,
            7 => Self::Bool,
            8 => Self::Byte,
            9 => Self::Func,
            10 => Self::Id,
            11 => Self::Span,
            _ => return None,
        })
    }
}

/// A first-class weak pointer: a slot address inside the interpreter
/// identified by `interp`.
///
/// Pointers never keep their target alive. The collector remaps pointers
/// whose `interp` matches the collecting interpreter and nils the ones whose
/// target slot was not copied; pointers into other interpreters are copied
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub addr: usize,
    pub interp: u64,
}

impl Pointer {
    /// The nil pointer. Interpreter ids start at 1, so `interp == 0` can
    /// never name a live frame.
    pub const NIL: Self = Self { addr: 0, interp: 0 };

    #[must_use]
    pub fn new(addr: usize, interp: u64) -> Self {
        Self { addr, interp }
    }

    #[must_use]
    pub fn is_nil(self) -> bool {
        self.interp == 0
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{addr:x}@{interp:x}", addr = self.addr, interp = self.interp)
    }
}

/// A user or built-in function value.
///
/// An empty `node` marks a built-in: the evaluator dispatches those by name
/// instead of descending into a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    /// Body block name; empty for built-ins.
    pub node: String,
    pub params: Vec<String>,
}

impl Func {
    #[must_use]
    pub fn builtin(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            node: String::new(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.node.is_empty()
    }
}

/// A typed slice view `(dtype, start, length)` into the owning store's arena
/// of `dtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub dtype: Kind,
    pub start: usize,
    pub length: usize,
}

/// Payload of a typed array: one homogeneous vector per supported dtype.
///
/// `Noth` is the empty, not-yet-typed array (`noth.[]`).
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Noth,
    Ints(Vec<BigInt>),
    Floats(Vec<BigDecimal>),
    Strs(Vec<String>),
    Bools(Vec<bool>),
    Bytes(Vec<u8>),
}

impl ArrayData {
    #[must_use]
    pub fn empty(dtype: Kind) -> Self {
        match dtype {
            Kind::Int => Self::Ints(Vec::new()),
            Kind::Float => Self::Floats(Vec::new()),
            Kind::Str => Self::Strs(Vec::new()),
            Kind::Bool => Self::Bools(Vec::new()),
            Kind::Byte => Self::Bytes(Vec::new()),
            _ => Self::Noth,
        }
    }

    #[must_use]
    pub fn dtype(&self) -> Kind {
        match self {
            Self::Noth => Kind::Noth,
            Self::Ints(_) => Kind::Int,
            Self::Floats(_) => Kind::Float,
            Self::Strs(_) => Kind::Str,
            Self::Bools(_) => Kind::Bool,
            Self::Bytes(_) => Kind::Byte,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Noth => 0,
            Self::Ints(v) => v.len(),
            Self::Floats(v) => v.len(),
            Self::Strs(v) => v.len(),
            Self::Bools(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a scalar, fixing the dtype on first append. Returns `false`
    /// when the item's kind does not match the array's dtype.
    pub fn push(&mut self, item: &Object) -> bool {
        if matches!(self, Self::Noth) {
            *self = Self::empty(item.kind());
        }
        match (self, item) {
            (Self::Ints(v), Object::Int(i)) => v.push(i.clone()),
            (Self::Floats(v), Object::Float(x)) => v.push(x.clone()),
            (Self::Strs(v), Object::Str(s)) => v.push(s.clone()),
            (Self::Bools(v), Object::Bool(b)) => v.push(*b),
            (Self::Bytes(v), Object::Byte(b)) => v.push(*b),
            _ => return false,
        }
        true
    }

    /// Renders the `dtype.[items]` literal form.
    #[must_use]
    pub fn render(&self) -> String {
        let items: Vec<String> = match self {
            Self::Noth => Vec::new(),
            Self::Ints(v) => v.iter().map(ToString::to_string).collect(),
            Self::Floats(v) => v.iter().map(render_float).collect(),
            Self::Strs(v) => v.iter().map(|s| format!("\"{s}\"")).collect(),
            Self::Bools(v) => v.iter().map(ToString::to_string).collect(),
            Self::Bytes(v) => v.iter().map(|b| format!("b.{b}")).collect(),
        };
        format!("{}.[{}]", self.dtype(), items.join(", "))
    }
}

/// An ordered sequence of element slots, each addressed by a weak pointer.
///
/// Elements of a list owned by store `S` normally point into `S` itself;
/// foreign pointers only appear through cross-interpreter ids stored in the
/// list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List {
    pub ids: Vec<Pointer>,
}

/// A mapping from encoded keys (`"<kind>:<lexical form>"`) to element slots.
///
/// The encoded key is the canonical map key, not user-visible text; display
/// decodes it back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pair {
    pub ids: IndexMap<String, Pointer>,
}

/// A value in arena form: containers hold slot pointers local to the owning
/// store. This is the type that moves in and out of arenas; use [`Object`]
/// when a value must leave its store.
#[derive(Debug, Clone)]
pub enum Value {
    Noth,
    Int(BigInt),
    Float(BigDecimal),
    Str(String),
    Bool(bool),
    Byte(u8),
    Func(Func),
    Id(Pointer),
    Arr(ArrayData),
    Span(Span),
    List(List),
    Pair(Pair),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Noth => Kind::Noth,
            Self::Int(_) => Kind::Int,
            Self::Float(_) => Kind::Float,
            Self::Str(_) => Kind::Str,
            Self::Bool(_) => Kind::Bool,
            Self::Byte(_) => Kind::Byte,
            Self::Func(_) => Kind::Func,
            Self::Id(_) => Kind::Id,
            Self::Arr(_) => Kind::Arr,
            Self::Span(_) => Kind::Span,
            Self::List(_) => Kind::List,
            Self::Pair(_) => Kind::Pair,
        }
    }
}

/// The self-contained, deep form of a value.
///
/// Where [`Value`] references slots of a particular store, an `Object` owns
/// its whole tree, so it can cross frame and thread boundaries: function
/// argument and return deep copies, pool/process result transfer, worker
/// snapshots, REPL echo, structural comparison, and the embedding interface
/// all move `Object`s.
///
/// Spans do not survive extraction; they materialise as typed arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Noth,
    Int(BigInt),
    Float(BigDecimal),
    Str(String),
    Bool(bool),
    Byte(u8),
    Func(Func),
    Id(Pointer),
    Arr(ArrayData),
    List(Vec<Object>),
    /// Entries keyed by the encoded `"<kind>:<lexical>"` form.
    Pair(Vec<(String, Object)>),
}

impl Object {
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Noth => Kind::Noth,
            Self::Int(_) => Kind::Int,
            Self::Float(_) => Kind::Float,
            Self::Str(_) => Kind::Str,
            Self::Bool(_) => Kind::Bool,
            Self::Byte(_) => Kind::Byte,
            Self::Func(_) => Kind::Func,
            Self::Id(_) => Kind::Id,
            Self::Arr(_) => Kind::Arr,
            Self::List(_) => Kind::List,
            Self::Pair(_) => Kind::Pair,
        }
    }

    /// Print form: bare strings at the top level, everything else as `repr`.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Quoted, re-readable form. Strings are double-quoted; containers
    /// render their elements recursively in this form.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Noth => "Nothing".to_owned(),
            Self::Int(i) => i.to_string(),
            Self::Float(x) => render_float(x),
            Self::Str(s) => format!("\"{s}\""),
            Self::Bool(b) => b.to_string(),
            Self::Byte(b) => format!("b.{b}"),
            Self::Func(f) => format!("func.{}", f.name),
            Self::Id(p) => format!("id.{p}"),
            Self::Arr(a) => a.render(),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Self::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Pair(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, val)| format!("{}: {}", decode_pair_key(key), val.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }

    /// The lexical form used inside encoded pair keys.
    #[must_use]
    pub fn key_lexical(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Encodes this value as a canonical pair key: `"<kind>:<lexical>"`.
    #[must_use]
    pub fn encode_key(&self) -> String {
        format!("{}:{}", self.kind(), self.key_lexical())
    }
}

/// Decodes an encoded pair key back into display text; string keys come back
/// double-quoted.
#[must_use]
pub fn decode_pair_key(key: &str) -> String {
    match key.split_once(':') {
        Some(("str", rest)) => format!("\"{rest}\""),
        Some((_, rest)) => rest.to_owned(),
        None => key.to_owned(),
    }
}

/// Renders a big float in its shortest plain-decimal form.
#[must_use]
pub fn render_float(x: &BigDecimal) -> String {
    x.normalized().to_string()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn kind_display_matches_language_names() {
        assert_eq!(Kind::Noth.to_string(), "noth");
        assert_eq!(Kind::Pair.to_string(), "pair");
        assert_eq!(Kind::Span.to_string(), "span");
    }

    #[test]
    fn kind_byte_round_trip() {
        for b in 0..=11u8 {
            let kind = Kind::from_byte(b).unwrap();
            assert_eq!(kind as u8, b);
        }
        assert!(Kind::from_byte(12).is_none());
    }

    #[test]
    fn object_repr_forms() {
        let list = Object::List(vec![
            Object::Int(BigInt::from(1)),
            Object::Str("hi".to_owned()),
            Object::Bool(true),
        ]);
        assert_eq!(list.repr(), "[1, \"hi\", true]");

        let pair = Object::Pair(vec![
            ("str:a".to_owned(), Object::Int(BigInt::from(1))),
            ("int:2".to_owned(), Object::Byte(7)),
        ]);
        assert_eq!(pair.repr(), "{\"a\": 1, 2: b.7}");
    }

    #[test]
    fn float_render_is_normalized() {
        let x = BigDecimal::from_str("3.5000").unwrap();
        assert_eq!(render_float(&x), "3.5");
        let whole = BigDecimal::from_str("3.0").unwrap();
        assert_eq!(render_float(&whole), "3");
    }

    #[test]
    fn array_push_fixes_dtype() {
        let mut arr = ArrayData::Noth;
        assert!(arr.push(&Object::Int(BigInt::from(4))));
        assert_eq!(arr.dtype(), Kind::Int);
        assert!(!arr.push(&Object::Str("no".to_owned())));
        assert_eq!(arr.render(), "int.[4]");
    }

    #[test]
    fn nil_pointer_is_recognised() {
        assert!(Pointer::NIL.is_nil());
        assert!(!Pointer::new(3, 1).is_nil());
    }
}
