//! Minimal pickle codec used for the PyTorch and scikit-learn style fixtures.
//!
//! # Submodules
//! - [`ser`] — value → opcode stream, mirroring CPython's pickler choices
//!   except that equal strings share one memo slot (CPython memoizes by
//!   object identity, so runtime-built duplicates come out twice there)
//! - [`de`]  — opcode stream → value, for reading fixtures back
//!
//! Only the plain-data subset of pickle is supported: `None`, booleans,
//! 64-bit integers, floats, strings, lists and string-keyed dicts. No
//! `GLOBAL`/`REDUCE`, so decoding never instantiates foreign objects.

pub mod de;
pub mod ser;

use thiserror::Error;

pub use de::from_slice;
pub use ser::to_vec;

/// Protocol used by `pickle.dump` when none is given (Python 3.8+).
pub const DEFAULT_PROTOCOL: u8 = 4;
/// Highest protocol this encoder writes.
pub const HIGHEST_PROTOCOL: u8 = 4;
/// Lowest protocol this encoder writes.
pub const LOWEST_PROTOCOL: u8 = 2;

pub(crate) mod opcodes {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const NONE: u8 = b'N';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const BINFLOAT: u8 = b'G';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const APPENDS: u8 = b'e';
    pub const SETITEM: u8 = b's';
    pub const SETITEMS: u8 = b'u';
    pub const EMPTY_DICT: u8 = b'}';
    pub const EMPTY_LIST: u8 = b']';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const TUPLE: u8 = b't';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';

    // protocol 2
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // protocol 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
}

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("unsupported pickle protocol: {0}")]
    UnsupportedProtocol(u8),
    #[error("string of {len} bytes cannot be encoded with protocol {protocol}")]
    StringTooLong { len: usize, protocol: u8 },
    #[error("unexpected end of pickle data at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error("no MARK on the stack at offset {offset}")]
    MissingMark { offset: usize },
    #[error("memo key {0} not found")]
    MissingMemo(u32),
    #[error("opcode 0x{opcode:02x} at offset {offset} expects a {expected} on the stack")]
    WrongTarget {
        opcode: u8,
        offset: usize,
        expected: &'static str,
    },
    #[error("odd number of items for SETITEMS at offset {offset}")]
    OddSetItems { offset: usize },
    #[error("container refers to itself and cannot be represented as a value tree")]
    RecursiveStructure,
    #[error("integer does not fit in 64 bits")]
    IntegerOverflow,
    #[error("invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Plain-data pickle value.
///
/// `Dict` keeps insertion order, which pickle preserves on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    /// Build a dict from string keys, preserving iteration order.
    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Str(k.into()), v))
                .collect(),
        )
    }

    /// Look up a string key in a dict. Returns `None` for non-dicts.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries.iter().find_map(|(k, v)| match k {
                Value::Str(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}
