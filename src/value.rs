//! The runtime value representation (spec.md §3.1) and its operator/comparison/truthiness/
//! indexing/hashing dispatch.
//!
//! Grounded on the teacher's `value::Value` (`PyTrait` per-variant `match` dispatch for
//! `py_type`/`py_eq`/`py_cmp`/`py_bool`/`py_add`/.../`py_getitem`), generalized from Python's
//! value set to spec.md's primitive set and from the teacher's arena+`HeapId` indirection to
//! direct `Rc`-wrapped compound values (`crate::types`), since ownership is tracked by Rust's own
//! reference counting rather than a separate heap.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::types::{
    normalize_index, normalize_slice, Closure, HostHandle, VBytes, VList, VMap, VModule, VNative, VPartial, VRange,
    VString,
};

/// A runtime value (spec.md §3.1).
///
/// `Clone` is cheap for every variant: immediates are `Copy`-sized, compound values share their
/// backing storage through `Rc`.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Byte(u8),
    Float(f64),
    String(VString),
    Bytes(VBytes),
    List(VList),
    Map(VMap),
    Range(VRange),
    Closure(Closure),
    NativeFunction(VNative),
    Module(VModule),
    Partial(VPartial),
    /// A raised-and-caught or constructed error, handled as an ordinary value once inside a
    /// `catch` block (spec.md §4.6 "the caught error is bound to the catch variable as a value").
    Error(Rc<Error>),
    Host(HostHandle),
}

/// A promoted numeric value used to implement spec.md §3.1's numeric tower
/// (`Byte -> Int -> Float`).
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Number> {
        match value {
            Value::Byte(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Promotes a pair of numbers to a common representation: `Float` wins if either operand is
    /// one, otherwise both stay `Int`.
    fn promote(a: Number, b: Number) -> (Number, Number) {
        match (a, b) {
            (Number::Float(_), _) | (_, Number::Float(_)) => (Number::Float(a.as_f64()), Number::Float(b.as_f64())),
            _ => (a, b),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

/// Smallest/largest `n` kept in the [`Value::int`] cache (spec.md §3.1 P7).
const SMALL_INT_LOW: i64 = -10;
const SMALL_INT_HIGH: i64 = 255;
const SMALL_INT_COUNT: usize = (SMALL_INT_HIGH - SMALL_INT_LOW + 1) as usize;

thread_local! {
    // `Value` wraps `Rc`, so this cache can't be a cross-thread `static`; each thread that runs
    // a VM builds its own copy on first use instead.
    static SMALL_INTS: std::cell::OnceCell<[Value; SMALL_INT_COUNT]> = std::cell::OnceCell::new();
}

impl Value {
    /// Builds an int value, reusing a shared instance for the commonly hit `[-10, 255]` range
    /// (spec.md §3.1 P7) instead of constructing a fresh one every time.
    #[must_use]
    pub fn int(n: i64) -> Self {
        if (SMALL_INT_LOW..=SMALL_INT_HIGH).contains(&n) {
            SMALL_INTS.with(|cache| {
                let table = cache.get_or_init(|| std::array::from_fn(|i| Value::Int(SMALL_INT_LOW + i as i64)));
                table[(n - SMALL_INT_LOW) as usize].clone()
            })
        } else {
            Self::Int(n)
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Byte(_) => "byte",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Range(_) => "range",
            Self::Closure(_) => "function",
            Self::NativeFunction(_) => "native_function",
            Self::Module(_) => "module",
            Self::Partial(_) => "partial",
            Self::Error(_) => "error",
            Self::Host(h) => h.host_type.name,
        }
    }

    /// Truthiness used by `if`/`while`/boolean operators (spec.md §3.1 "Truthiness").
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Byte(b) => *b != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.as_str().is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::Map(m) => !m.is_empty(),
            Self::Range(r) => !r.is_empty(),
            Self::Closure(_)
            | Self::NativeFunction(_)
            | Self::Module(_)
            | Self::Partial(_)
            | Self::Error(_)
            | Self::Host(_) => true,
        }
    }

    /// Value equality (spec.md §3.1 "Equality"): same-type structural equality, plus two
    /// explicit cross-type groups (`{Int, Float, Byte}` and `{Bytes, String}`). `NaN` is unequal
    /// to everything, including itself.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (Number::of(self), Number::of(other)) {
            return match Number::promote(a, b) {
                (Number::Int(a), Number::Int(b)) => a == b,
                (Number::Float(a), Number::Float(b)) => a == b,
                _ => unreachable!(),
            };
        }
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a.as_str() == b.as_str(),
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::String(a), Self::Bytes(b)) | (Self::Bytes(b), Self::String(a)) => {
                b.with_bytes(|bytes| bytes == a.as_str().as_bytes())
            }
            (Self::List(a), Self::List(b)) => {
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.entries().into_iter().all(|(k, v)| b.get(&k).is_some_and(|bv| v.py_eq(&bv)))
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Closure(a), Self::Closure(b)) => a.ptr_eq(b),
            (Self::NativeFunction(a), Self::NativeFunction(b)) => a.ptr_eq(b),
            (Self::Module(a), Self::Module(b)) => a.ptr_eq(b),
            (Self::Partial(a), Self::Partial(b)) => a.ptr_eq(b),
            (Self::Error(a), Self::Error(b)) => Rc::ptr_eq(a, b),
            (Self::Host(a), Self::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Ordering comparison for `<`, `<=`, `>`, `>=` (spec.md §3.1 "Ordering"). Only numbers and
    /// same-type strings/bytes are ordered; anything else is a `TypeError`.
    pub fn py_cmp(&self, other: &Self) -> Result<Ordering> {
        if let (Some(a), Some(b)) = (Number::of(self), Number::of(other)) {
            return match Number::promote(a, b) {
                (Number::Int(a), Number::Int(b)) => Ok(a.cmp(&b)),
                (Number::Float(a), Number::Float(b)) => {
                    a.partial_cmp(&b).ok_or_else(|| Error::value_error("cannot order NaN"))
                }
                _ => unreachable!(),
            };
        }
        match (self, other) {
            (Self::String(a), Self::String(b)) => Ok(a.as_str().cmp(b.as_str())),
            (Self::Bytes(a), Self::Bytes(b)) => Ok(a.as_vec().cmp(&b.as_vec())),
            _ => Err(Error::unsupported_binary_operation("<", self.type_name(), other.type_name())),
        }
    }

    /// Hashes a value for use as a map key lookup helper or set element (spec.md §3.1
    /// "Hashing"). Mutable compound values and `NaN` are unhashable.
    pub fn hash_value(&self) -> Result<u64> {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        match self {
            Self::Nil => 0u8.hash(&mut hasher),
            Self::Bool(b) => b.hash(&mut hasher),
            Self::Int(i) => i.hash(&mut hasher),
            Self::Byte(b) => i64::from(*b).hash(&mut hasher),
            Self::Float(f) => {
                if f.is_nan() {
                    return Err(Error::value_error("unhashable type: NaN"));
                }
                f.to_bits().hash(&mut hasher);
            }
            Self::String(s) => s.as_str().hash(&mut hasher),
            Self::Bytes(b) => b.with_bytes(|bytes| bytes.hash(&mut hasher)),
            Self::Range(r) => (r.start, r.stop, r.step).hash(&mut hasher),
            _ => return Err(Error::value_error(format!("unhashable type: {}", self.type_name()))),
        }
        Ok(hasher.finish())
    }

    fn numeric_binop(
        &self,
        other: &Self,
        op: &'static str,
        int_op: impl FnOnce(i64, i64) -> Result<i64>,
        float_op: impl FnOnce(f64, f64) -> Result<f64>,
    ) -> Result<Value> {
        let (a, b) = match (Number::of(self), Number::of(other)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(Error::unsupported_binary_operation(op, self.type_name(), other.type_name())),
        };
        match Number::promote(a, b) {
            (Number::Int(a), Number::Int(b)) => Ok(Value::int(int_op(a, b)?)),
            (Number::Float(a), Number::Float(b)) => Ok(Value::Float(float_op(a, b)?)),
            _ => unreachable!(),
        }
    }

    /// `+` (spec.md §3.1): numeric addition, or string/bytes/list concatenation.
    pub fn add(&self, other: &Self) -> Result<Value> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Ok(Value::String(a.concat(b.as_str()))),
            (Self::Bytes(a), Self::Bytes(b)) => Ok(Value::Bytes(b.with_bytes(|bytes| a.concat(bytes)))),
            (Self::List(a), Self::List(b)) => {
                let mut items = a.snapshot();
                items.extend(b.snapshot());
                Ok(Value::List(VList::new(items)))
            }
            _ => self.numeric_binop(other, "+", |a, b| Ok(a.wrapping_add(b)), |a, b| Ok(a + b)),
        }
    }

    /// `-` (spec.md §3.1): numeric subtraction only.
    pub fn sub(&self, other: &Self) -> Result<Value> {
        self.numeric_binop(other, "-", |a, b| Ok(a.wrapping_sub(b)), |a, b| Ok(a - b))
    }

    /// `*` (spec.md §3.1): numeric multiplication only.
    pub fn mul(&self, other: &Self) -> Result<Value> {
        self.numeric_binop(other, "*", |a, b| Ok(a.wrapping_mul(b)), |a, b| Ok(a * b))
    }

    /// `/` (spec.md §3.1): true division; always produces a `Float`, errors on division by zero.
    pub fn div(&self, other: &Self) -> Result<Value> {
        let (a, b) = match (Number::of(self), Number::of(other)) {
            (Some(a), Some(b)) => (a.as_f64(), b.as_f64()),
            _ => return Err(Error::unsupported_binary_operation("/", self.type_name(), other.type_name())),
        };
        if b == 0.0 {
            return Err(Error::division_by_zero());
        }
        Ok(Value::Float(a / b))
    }

    /// `//` (spec.md §3.1): floor division, staying in `Int` when both operands are integral.
    pub fn floordiv(&self, other: &Self) -> Result<Value> {
        self.numeric_binop(
            other,
            "//",
            |a, b| {
                if b == 0 {
                    return Err(Error::division_by_zero());
                }
                Ok(a.div_euclid(b))
            },
            |a, b| {
                if b == 0.0 {
                    return Err(Error::division_by_zero());
                }
                Ok((a / b).floor())
            },
        )
    }

    /// `%` (spec.md §3.1): modulo, sign follows the divisor (Euclidean-style for integers).
    pub fn modulo(&self, other: &Self) -> Result<Value> {
        self.numeric_binop(
            other,
            "%",
            |a, b| {
                if b == 0 {
                    return Err(Error::division_by_zero());
                }
                Ok(a.rem_euclid(b))
            },
            |a, b| {
                if b == 0.0 {
                    return Err(Error::division_by_zero());
                }
                Ok(a.rem_euclid(b))
            },
        )
    }

    /// `**` (spec.md §3.1): exponentiation; negative integer exponents promote to `Float`.
    pub fn pow(&self, other: &Self) -> Result<Value> {
        let (a, b) = match (Number::of(self), Number::of(other)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(Error::unsupported_binary_operation("**", self.type_name(), other.type_name())),
        };
        match (a, b) {
            (Number::Int(a), Number::Int(b)) if b >= 0 => {
                u32::try_from(b).ok().map_or_else(
                    || Ok(Value::Float((a as f64).powf(b as f64))),
                    |exp| Ok(Value::Int(a.wrapping_pow(exp))),
                )
            }
            _ => Ok(Value::Float(a.as_f64().powf(b.as_f64()))),
        }
    }

    /// Unary `-`.
    pub fn neg(&self) -> Result<Value> {
        match self {
            Self::Int(i) => Ok(Value::Int(-i)),
            Self::Byte(b) => Ok(Value::Int(-i64::from(*b))),
            Self::Float(f) => Ok(Value::Float(-f)),
            _ => Err(Error::unsupported_operation("-", self.type_name())),
        }
    }

    /// Indexed read (spec.md §4.1 "negative-index and slice normalization").
    pub fn get_item(&self, index: &Self) -> Result<Value> {
        match self {
            Self::List(list) => {
                let i = Self::index_as_i64(index)?;
                normalize_index(i, list.len())
                    .and_then(|i| list.get(i))
                    .ok_or_else(|| Error::index_out_of_range(i))
            }
            Self::String(s) => {
                let i = Self::index_as_i64(index)?;
                normalize_index(i, s.char_len())
                    .and_then(|i| s.char_at(i))
                    .map(|c| Value::String(VString::new(c)))
                    .ok_or_else(|| Error::index_out_of_range(i))
            }
            Self::Bytes(b) => {
                let i = Self::index_as_i64(index)?;
                normalize_index(i, b.len())
                    .and_then(|i| b.get(i))
                    .map(Value::Byte)
                    .ok_or_else(|| Error::index_out_of_range(i))
            }
            Self::Map(map) => {
                let Self::String(key) = index else {
                    return Err(Error::type_error(format!("map keys must be strings, got {}", index.type_name())));
                };
                map.get(key.as_str()).ok_or_else(|| Error::name_error(format!("key not found: {}", key.as_str())))
            }
            Self::Range(r) => {
                let i = Self::index_as_i64(index)?;
                let len = r.len();
                normalize_index(i, len).map(|i| Value::Int(r.nth(i))).ok_or_else(|| Error::index_out_of_range(i))
            }
            _ => Err(Error::unsupported_operation("[]", self.type_name())),
        }
    }

    /// Slice read: `value[start:stop]`.
    pub fn get_slice(&self, start: Option<i64>, stop: Option<i64>) -> Result<Value> {
        match self {
            Self::List(list) => {
                let (start, stop) = normalize_slice(start, stop, list.len());
                Ok(Value::List(VList::new(list.slice(start, stop))))
            }
            Self::String(s) => {
                let (start, stop) = normalize_slice(start, stop, s.char_len());
                Ok(Value::String(VString::new(s.slice(start, stop))))
            }
            Self::Bytes(b) => {
                let (start, stop) = normalize_slice(start, stop, b.len());
                Ok(Value::Bytes(VBytes::new(b.slice(start, stop))))
            }
            _ => Err(Error::unsupported_operation("[:]", self.type_name())),
        }
    }

    /// Indexed write: `value[index] = v`.
    pub fn set_item(&self, index: &Self, value: Value) -> Result<()> {
        match self {
            Self::List(list) => {
                let i = Self::index_as_i64(index)?;
                let resolved = normalize_index(i, list.len()).ok_or_else(|| Error::index_out_of_range(i))?;
                list.set(resolved, value);
                Ok(())
            }
            Self::Map(map) => {
                let Self::String(key) = index else {
                    return Err(Error::type_error(format!("map keys must be strings, got {}", index.type_name())));
                };
                map.set(key.as_str().to_string(), value);
                Ok(())
            }
            Self::Bytes(bytes) => {
                let i = Self::index_as_i64(index)?;
                let resolved = normalize_index(i, bytes.len()).ok_or_else(|| Error::index_out_of_range(i))?;
                let byte = Self::value_as_byte(&value)?;
                bytes.set(resolved, byte);
                Ok(())
            }
            _ => Err(Error::unsupported_operation("[]=", self.type_name())),
        }
    }

    /// `get_attr(name)` (spec.md §4.1): returns the receiver's bound method/field, or `None` if
    /// absent. String/List/Bytes/Map/Range expose their built-in methods this way.
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        crate::methods::bind(self, name)
    }

    /// `set_attr(name, value)` (spec.md §4.1): only structured host handles support attribute
    /// assignment; every other type rejects it.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        match self {
            Self::Host(handle) => handle.set_attr(name, value),
            _ => Err(Error::type_error(format!("{} has no settable attribute {name:?}", self.type_name()))),
        }
    }

    fn index_as_i64(index: &Self) -> Result<i64> {
        match index {
            Self::Int(i) => Ok(*i),
            Self::Byte(b) => Ok(i64::from(*b)),
            _ => Err(Error::type_error(format!("index must be an integer, got {}", index.type_name()))),
        }
    }

    /// Validates that a bytes-element assignment RHS is a single byte (spec.md §56: "element
    /// assignment permitted with single-byte values").
    fn value_as_byte(value: &Self) -> Result<u8> {
        match value {
            Self::Byte(b) => Ok(*b),
            Self::Int(i) if (0..=255).contains(i) => Ok(*i as u8),
            other => Err(Error::type_error(format!("expected a byte value in 0..=255, got {}", other.type_name()))),
        }
    }

    /// Number of elements for `len()` and `for`-loop bounds, where that is meaningful.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.char_len()),
            Self::Bytes(b) => Some(b.len()),
            Self::List(l) => Some(l.len()),
            Self::Map(m) => Some(m.len()),
            Self::Range(r) => Some(r.len()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Byte(b) => write!(f, "{b}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "{}", b.repr()),
            Self::List(list) => {
                write!(f, "[")?;
                for (i, item) in list.snapshot().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Range(r) => write!(f, "range({}, {}, {})", r.start, r.stop, r.step),
            Self::Closure(_) => write!(f, "<function>"),
            Self::NativeFunction(n) => write!(f, "<native_function {}>", n.name),
            Self::Module(m) => write!(f, "<module {}>", m.name()),
            Self::Partial(_) => write!(f, "<partial>"),
            Self::Error(e) => write!(f, "{}", e.message),
            Self::Host(h) => write!(f, "<{} {}>", h.host_type.name, h.describe()),
        }
    }
}

/// The serializable subset of [`Value`] (spec.md §4.2/§6.4): literal constants a `Code`'s
/// constant pool actually holds (`Int`/`Float`/`String`, per `bytecode::compiler`'s emitted
/// constants) plus the remaining value-like shapes a host-format consumer could reasonably expect
/// a round trip to preserve. `Closure`/`NativeFunction`/`Module`/`Partial`/`Error`/`Host` never
/// appear in a compiled constant pool and have no external representation (spec.md §6.3 "a
/// descriptive inspect string, no native representation"), so they are rejected rather than
/// silently coerced.
#[derive(serde::Serialize, serde::Deserialize)]
enum ValueRepr {
    Nil,
    Bool(bool),
    Int(i64),
    Byte(u8),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<ValueRepr>),
    Map(Vec<(String, ValueRepr)>),
    Range(i64, i64, i64),
}

impl ValueRepr {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        Ok(match value {
            Value::Nil => Self::Nil,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Byte(b) => Self::Byte(*b),
            Value::Float(v) => Self::Float(*v),
            Value::String(s) => Self::String(s.as_str().to_string()),
            Value::Bytes(b) => Self::Bytes(b.as_vec()),
            Value::List(list) => {
                let items = list.snapshot().iter().map(Self::from_value).collect::<std::result::Result<_, _>>()?;
                Self::List(items)
            }
            Value::Map(map) => {
                let entries = map
                    .entries()
                    .iter()
                    .map(|(k, v)| Ok::<_, String>((k.clone(), Self::from_value(v)?)))
                    .collect::<std::result::Result<_, _>>()?;
                Self::Map(entries)
            }
            Value::Range(r) => Self::Range(r.start, r.stop, r.step),
            other => return Err(format!("{} is not serializable", other.type_name())),
        })
    }

    fn into_value(self) -> Value {
        match self {
            Self::Nil => Value::Nil,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Byte(b) => Value::Byte(b),
            Self::Float(v) => Value::Float(v),
            Self::String(s) => Value::String(VString::new(s)),
            Self::Bytes(b) => Value::Bytes(VBytes::new(b)),
            Self::List(items) => Value::List(VList::new(items.into_iter().map(Self::into_value).collect())),
            Self::Map(entries) => {
                let mut map = indexmap::IndexMap::new();
                for (k, v) in entries {
                    map.insert(k, v.into_value());
                }
                Value::Map(VMap::new(map))
            }
            Self::Range(start, stop, step) => {
                Value::Range(VRange::new(start, stop, step).unwrap_or_else(|_| VRange::new(0, 0, 1).expect("0,0,1 is always a valid range")))
            }
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ValueRepr::from_value(self).map_err(serde::ser::Error::custom)?.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        ValueRepr::deserialize(deserializer).map(ValueRepr::into_value)
    }
}
