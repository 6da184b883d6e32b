use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int,
    Text,
    Bool,
}

/// The key/value type indexed by the B+ tree and extendible hash table.
///
/// Variants carry a fixed-width encoding on the B+ tree's disk page (8 bytes
/// for `Int`; see `btree::page` for the layout), which is why the index
/// types in this workspace are specialized to `Value::Int` keys even though
/// `Value` itself stays general-purpose.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.eq(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.eq(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.eq(b)),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

/// Total order over `Value`, needed so the B+ tree and hash table can sort
/// and compare keys without callers juggling `Option<Ordering>` at every
/// call site. Within a type the order matches `cmp_same_type`; across types
/// it falls back to a fixed type rank so the order stays total (homogeneous
/// indexes never exercise the cross-type branch).
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_same_type(other)
            .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank()))
    }
}

/// Stringifies a key the way the extendible hash table's
/// `hash(key, depth) = xxhash64(stringify(key))` expects, so integer and
/// string keys remain comparable for tests (spec §9, "Hash value for string
/// keys").
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
        }
    }
}
