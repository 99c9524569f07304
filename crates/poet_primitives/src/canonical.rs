//! Canonical value model and its deterministic binary form.
//!
//! The byte form is a strict subset of CBOR (RFC 8949), chosen so that any
//! implementation holding the same logical content produces the same bytes:
//!
//! - integers: major 0/1, shortest argument encoding
//! - text: major 3, UTF-8
//! - sequences: major 4, definite length, positional order kept
//! - maps: major 5, definite length, text keys in ascending byte order
//! - booleans: `0xf4` / `0xf5`
//! - floats and ratios: `0xfb` followed by big-endian IEEE-754 binary64
//!
//! Byte strings, tags, indefinite lengths and half/single precision floats are
//! never produced and are rejected by [`decode`].

use std::collections::BTreeMap;

use thiserror::Error;

use crate::constants::MAX_DEPTH;

const MAJOR_UINT: u8 = 0;
const MAJOR_NINT: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_F64: u8 = 27;
const INFO_INDEFINITE: u8 = 31;

/// Host-side value handed to [`canonicalize`].
///
/// Map entries keep the caller's insertion order; ordering is imposed only
/// when the value is canonicalized.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Map(Vec<(String, Value)>),
    Seq(Vec<Value>),
    Str(String),
    Int(i64),
    Float(f64),
    /// A fixed-point-looking quantity that must always serialize as a float.
    Ratio(f64),
    Bool(bool),
}

impl Value {
    /// Empty map.
    #[must_use]
    pub const fn map() -> Self {
        Self::Map(Vec::new())
    }

    /// Builder-style insert for maps; replaces an existing entry with the same key.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Self>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace `key` in a map. No-op on non-map values.
    pub fn insert(&mut self, key: &str, value: impl Into<Self>) {
        if let Self::Map(entries) = self {
            let value = value.into();
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key.to_owned(), value)),
            }
        }
    }

    /// Remove `key` from a map, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Self> {
        match self {
            Self::Map(entries) => {
                let pos = entries.iter().position(|(k, _)| k == key)?;
                Some(entries.remove(pos).1)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Seq(items)
    }
}

/// A value whose serialization is a pure function of its content.
///
/// Maps are key-sorted, ratios have been folded into floats and every float is finite.
#[derive(Clone, Debug, PartialEq)]
pub enum CanonicalValue {
    Map(BTreeMap<String, CanonicalValue>),
    Seq(Vec<CanonicalValue>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl CanonicalValue {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(m) => m.get(key),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_seq(&self) -> Option<&Vec<Self>> {
        match self {
            Self::Seq(items) => Some(items),
            _ => None,
        }
    }
}

impl From<CanonicalValue> for Value {
    fn from(v: CanonicalValue) -> Self {
        match v {
            CanonicalValue::Map(m) => Self::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect()),
            CanonicalValue::Seq(items) => Self::Seq(items.into_iter().map(Into::into).collect()),
            CanonicalValue::Str(s) => Self::Str(s),
            CanonicalValue::Int(n) => Self::Int(n),
            CanonicalValue::Float(x) => Self::Float(x),
            CanonicalValue::Bool(b) => Self::Bool(b),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanonicalizationError {
    #[error("duplicate map key: {key}")]
    DuplicateKey { key: String },

    #[error("non-finite float in field {field}")]
    NonFiniteFloat { field: String },

    #[error("ratio field {field} does not hold a number")]
    RatioNotNumeric { field: String },

    #[error("nesting deeper than {limit} levels")]
    TooDeep { limit: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated input")]
    Truncated,

    #[error("{0} trailing bytes")]
    Trailing(usize),

    #[error("integer argument not in shortest form")]
    NonShortest,

    #[error("indefinite-length item")]
    Indefinite,

    #[error("reserved additional info {0}")]
    Reserved(u8),

    #[error("unsupported item: {0}")]
    Unsupported(&'static str),

    #[error("integer out of range")]
    IntOutOfRange,

    #[error("non-finite float")]
    NonFiniteFloat,

    #[error("invalid UTF-8 in text")]
    InvalidUtf8,

    #[error("map key is not text")]
    NonTextKey,

    #[error("map key {key} out of order or duplicated")]
    KeyOrder { key: String },

    #[error("nesting deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Fold a host value into canonical form.
///
/// Map keys are ordered byte-wise at every level, sequences keep their order,
/// and any map entry whose key is in `ratio_fields` is forced to a float.
/// Values are owned trees, so the nesting limit is what stands in for cycle detection.
///
/// # Errors
///
/// Returns [`CanonicalizationError`] on duplicate keys, non-finite floats,
/// non-numeric ratio fields, or nesting beyond [`MAX_DEPTH`].
pub fn canonicalize(value: &Value, ratio_fields: &[&str]) -> Result<CanonicalValue, CanonicalizationError> {
    canon(value, ratio_fields, None, 0)
}

/// `encode(canonicalize(value))` in one step.
///
/// # Errors
///
/// See [`canonicalize`].
pub fn to_canonical_bytes(value: &Value, ratio_fields: &[&str]) -> Result<Vec<u8>, CanonicalizationError> {
    canonicalize(value, ratio_fields).map(|c| encode(&c))
}

fn finite(x: f64, field: Option<&str>) -> Result<f64, CanonicalizationError> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(CanonicalizationError::NonFiniteFloat { field: field.unwrap_or("<element>").to_owned() })
    }
}

#[allow(clippy::cast_precision_loss)]
fn canon(
    value: &Value,
    ratio_fields: &[&str],
    field: Option<&str>,
    depth: usize,
) -> Result<CanonicalValue, CanonicalizationError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalizationError::TooDeep { limit: MAX_DEPTH });
    }
    let forced = field.is_some_and(|f| ratio_fields.contains(&f));
    match value {
        Value::Int(n) if forced => Ok(CanonicalValue::Float(finite(*n as f64, field)?)),
        Value::Float(x) | Value::Ratio(x) => Ok(CanonicalValue::Float(finite(*x, field)?)),
        _ if forced => Err(CanonicalizationError::RatioNotNumeric {
            field: field.unwrap_or_default().to_owned(),
        }),
        Value::Int(n) => Ok(CanonicalValue::Int(*n)),
        Value::Str(s) => Ok(CanonicalValue::Str(s.clone())),
        Value::Bool(b) => Ok(CanonicalValue::Bool(*b)),
        Value::Seq(items) => items
            .iter()
            .map(|item| canon(item, ratio_fields, None, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(CanonicalValue::Seq),
        Value::Map(entries) => {
            let mut out = BTreeMap::new();
            for (key, item) in entries {
                let c = canon(item, ratio_fields, Some(key), depth + 1)?;
                if out.insert(key.clone(), c).is_some() {
                    return Err(CanonicalizationError::DuplicateKey { key: key.clone() });
                }
            }
            Ok(CanonicalValue::Map(out))
        }
    }
}

/// Serialize a canonical value.
#[must_use]
pub fn encode(value: &CanonicalValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    encode_into(value, &mut out);
    out
}

#[allow(clippy::cast_possible_truncation)]
fn write_head(major: u8, arg: u64, out: &mut Vec<u8>) {
    let m = major << 5;
    if arg < 24 {
        out.push(m | arg as u8);
    } else if arg <= u64::from(u8::MAX) {
        out.push(m | 24);
        out.push(arg as u8);
    } else if arg <= u64::from(u16::MAX) {
        out.push(m | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u64::from(u32::MAX) {
        out.push(m | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(m | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

fn write_text(s: &str, out: &mut Vec<u8>) {
    write_head(MAJOR_TEXT, s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn encode_into(value: &CanonicalValue, out: &mut Vec<u8>) {
    match value {
        CanonicalValue::Int(n) if *n >= 0 => write_head(MAJOR_UINT, n.unsigned_abs(), out),
        // -1 - n == |n| - 1 for negative n, without overflow at i64::MIN
        CanonicalValue::Int(n) => write_head(MAJOR_NINT, n.unsigned_abs() - 1, out),
        CanonicalValue::Str(s) => write_text(s, out),
        CanonicalValue::Seq(items) => {
            write_head(MAJOR_ARRAY, items.len() as u64, out);
            for item in items {
                encode_into(item, out);
            }
        }
        CanonicalValue::Map(m) => {
            write_head(MAJOR_MAP, m.len() as u64, out);
            for (k, v) in m {
                write_text(k, out);
                encode_into(v, out);
            }
        }
        CanonicalValue::Float(x) => {
            out.push((MAJOR_SIMPLE << 5) | SIMPLE_F64);
            out.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        CanonicalValue::Bool(b) => out.push((MAJOR_SIMPLE << 5) | if *b { SIMPLE_TRUE } else { SIMPLE_FALSE }),
    }
}

fn read_exact<'a>(src: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if src.len() < n {
        return Err(DecodeError::Truncated);
    }
    let (a, b) = src.split_at(n);
    *src = b;
    Ok(a)
}

fn read_array<const N: usize>(src: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    let b = read_exact(src, N)?;
    let mut a = [0u8; N];
    a.copy_from_slice(b);
    Ok(a)
}

fn read_arg(src: &mut &[u8], info: u8) -> Result<u64, DecodeError> {
    let (value, floor) = match info {
        0..=23 => return Ok(u64::from(info)),
        24 => (u64::from(read_array::<1>(src)?[0]), 24),
        25 => (u64::from(u16::from_be_bytes(read_array::<2>(src)?)), 0x100),
        26 => (u64::from(u32::from_be_bytes(read_array::<4>(src)?)), 0x1_0000),
        27 => (u64::from_be_bytes(read_array::<8>(src)?), 0x1_0000_0000),
        INFO_INDEFINITE => return Err(DecodeError::Indefinite),
        other => return Err(DecodeError::Reserved(other)),
    };
    if value < floor {
        return Err(DecodeError::NonShortest);
    }
    Ok(value)
}

// Every element occupies at least one byte, so a count larger than the
// remaining input is already known to be truncated.
fn bounded_len(arg: u64, src: &[u8]) -> Result<usize, DecodeError> {
    let n = usize::try_from(arg).map_err(|_| DecodeError::Truncated)?;
    if n > src.len() {
        return Err(DecodeError::Truncated);
    }
    Ok(n)
}

fn read_text(src: &mut &[u8], arg: u64) -> Result<String, DecodeError> {
    let len = bounded_len(arg, src)?;
    let b = read_exact(src, len)?;
    core::str::from_utf8(b).map(str::to_owned).map_err(|_| DecodeError::InvalidUtf8)
}

/// Parse canonical bytes. Accepts exactly what [`encode`] produces.
///
/// # Errors
///
/// Returns [`DecodeError`] for truncated or trailing input, non-shortest
/// integers, unsorted or duplicate map keys, unsupported items, or nesting
/// beyond [`MAX_DEPTH`].
pub fn decode(bytes: &[u8]) -> Result<CanonicalValue, DecodeError> {
    let mut src = bytes;
    let value = decode_value(&mut src, 0)?;
    if !src.is_empty() {
        return Err(DecodeError::Trailing(src.len()));
    }
    Ok(value)
}

fn decode_value(src: &mut &[u8], depth: usize) -> Result<CanonicalValue, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::TooDeep { limit: MAX_DEPTH });
    }
    let [initial] = read_array::<1>(src)?;
    let major = initial >> 5;
    let info = initial & 0x1f;

    if major == MAJOR_SIMPLE {
        return match info {
            SIMPLE_FALSE => Ok(CanonicalValue::Bool(false)),
            SIMPLE_TRUE => Ok(CanonicalValue::Bool(true)),
            SIMPLE_F64 => {
                let x = f64::from_bits(u64::from_be_bytes(read_array::<8>(src)?));
                if x.is_finite() { Ok(CanonicalValue::Float(x)) } else { Err(DecodeError::NonFiniteFloat) }
            }
            _ => Err(DecodeError::Unsupported("simple value or narrow float")),
        };
    }

    let arg = read_arg(src, info)?;
    match major {
        MAJOR_UINT => i64::try_from(arg).map(CanonicalValue::Int).map_err(|_| DecodeError::IntOutOfRange),
        MAJOR_NINT => i64::try_from(arg)
            .map(|n| CanonicalValue::Int(-1 - n))
            .map_err(|_| DecodeError::IntOutOfRange),
        MAJOR_BYTES => Err(DecodeError::Unsupported("byte string")),
        MAJOR_TEXT => read_text(src, arg).map(CanonicalValue::Str),
        MAJOR_ARRAY => {
            let n = bounded_len(arg, src)?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(decode_value(src, depth + 1)?);
            }
            Ok(CanonicalValue::Seq(items))
        }
        MAJOR_MAP => {
            let n = bounded_len(arg, src)?;
            let mut map = BTreeMap::new();
            let mut last: Option<String> = None;
            for _ in 0..n {
                let [key_head] = read_array::<1>(src)?;
                if key_head >> 5 != MAJOR_TEXT {
                    return Err(DecodeError::NonTextKey);
                }
                let key_arg = read_arg(src, key_head & 0x1f)?;
                let key = read_text(src, key_arg)?;
                if last.as_deref().is_some_and(|prev| key.as_bytes() <= prev.as_bytes()) {
                    return Err(DecodeError::KeyOrder { key });
                }
                let item = decode_value(src, depth + 1)?;
                last = Some(key.clone());
                map.insert(key, item);
            }
            Ok(CanonicalValue::Map(map))
        }
        MAJOR_TAG => Err(DecodeError::Unsupported("tag")),
        _ => Err(DecodeError::Unsupported("major type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RATIO_FIELDS;

    fn bytes(v: &Value) -> Vec<u8> {
        to_canonical_bytes(v, RATIO_FIELDS).expect("canonical")
    }

    #[test]
    fn small_map_matches_known_bytes() {
        let v = Value::map().with("b", 1i64).with("a", "x");
        // {"a": "x", "b": 1}
        assert_eq!(bytes(&v), vec![0xa2, 0x61, b'a', 0x61, b'x', 0x61, b'b', 0x01]);
    }

    #[test]
    fn integer_heads_use_shortest_form() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 0x18]),
            (255, &[0x18, 0xff]),
            (256, &[0x19, 0x01, 0x00]),
            (65_536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
            (4_294_967_296, &[0x1b, 0, 0, 0, 1, 0, 0, 0, 0]),
            (-1, &[0x20]),
            (-25, &[0x38, 0x18]),
            (i64::MIN, &[0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
        ];
        for (n, expected) in cases {
            assert_eq!(encode(&CanonicalValue::Int(*n)), expected.to_vec(), "n = {n}");
            assert_eq!(decode(expected), Ok(CanonicalValue::Int(*n)));
        }
    }

    #[test]
    fn ratio_field_integer_encodes_as_float() {
        let as_int = Value::map().with("duration", 5i64);
        let as_float = Value::map().with("duration", 5.0f64);
        assert_eq!(bytes(&as_int), bytes(&as_float));
        let b = bytes(&as_int);
        // a1 68 "duration" fb 40 14 00 00 00 00 00 00
        assert_eq!(b[10], 0xfb);
        assert_eq!(&b[11..], &5.0f64.to_bits().to_be_bytes());
    }

    #[test]
    fn non_ratio_integer_stays_integer() {
        let v = Value::map().with("sequence_id", 5i64);
        assert_eq!(bytes(&v), vec![0xa1, 0x6b, b's', b'e', b'q', b'u', b'e', b'n', b'c', b'e', b'_', b'i', b'd', 0x05]);
    }

    #[test]
    fn sequences_keep_order() {
        let a = Value::Seq(vec![Value::Int(2), Value::Int(1)]);
        let b = Value::Seq(vec![Value::Int(1), Value::Int(2)]);
        assert_ne!(bytes(&a), bytes(&b));
    }

    #[test]
    fn nested_maps_sorted_at_every_level() {
        let inner1 = Value::map().with("z", 1i64).with("m", 2i64);
        let inner2 = Value::map().with("m", 2i64).with("z", 1i64);
        let a = Value::map().with("outer", inner1).with("alpha", true);
        let b = Value::map().with("alpha", true).with("outer", inner2);
        assert_eq!(bytes(&a), bytes(&b));
    }

    #[test]
    fn keys_sort_bytewise_not_by_length() {
        // "B" (0x42) < "a" (0x61) < "aa"
        let v = Value::map().with("aa", 1i64).with("a", 2i64).with("B", 3i64);
        let c = canonicalize(&v, &[]).expect("canonical");
        let CanonicalValue::Map(m) = c else { panic!("map expected") };
        let keys: Vec<&str> = m.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["B", "a", "aa"]);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let v = Value::Map(vec![("k".into(), Value::Int(1)), ("k".into(), Value::Int(2))]);
        assert_eq!(
            canonicalize(&v, &[]),
            Err(CanonicalizationError::DuplicateKey { key: "k".into() })
        );
    }

    #[test]
    fn non_finite_and_non_numeric_ratio_rejected() {
        let nan = Value::map().with("x", f64::NAN);
        assert!(matches!(canonicalize(&nan, &[]), Err(CanonicalizationError::NonFiniteFloat { .. })));
        let text = Value::map().with("duration", "soon");
        assert_eq!(
            canonicalize(&text, RATIO_FIELDS),
            Err(CanonicalizationError::RatioNotNumeric { field: "duration".into() })
        );
    }

    #[test]
    fn excessive_nesting_rejected() {
        let mut v = Value::Int(0);
        for _ in 0..=MAX_DEPTH {
            v = Value::Seq(vec![v]);
        }
        assert_eq!(canonicalize(&v, &[]), Err(CanonicalizationError::TooDeep { limit: MAX_DEPTH }));
    }

    #[test]
    fn decode_inverts_encode() {
        let v = Value::map()
            .with("duration", 12.5f64)
            .with("list", vec![Value::Int(-3), Value::Str("é".into()), Value::Bool(false)])
            .with("n", 1_000_000i64);
        let b = bytes(&v);
        let c = decode(&b).expect("decode");
        assert_eq!(encode(&c), b);
        assert_eq!(c.get("duration").and_then(CanonicalValue::as_f64), Some(12.5));
    }

    #[test]
    fn decode_rejects_non_canonical_input() {
        // 1 encoded with a one-byte argument
        assert_eq!(decode(&[0x18, 0x01]), Err(DecodeError::NonShortest));
        // keys out of order: {"b":1,"a":2}
        assert!(matches!(
            decode(&[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]),
            Err(DecodeError::KeyOrder { .. })
        ));
        // duplicate keys
        assert!(matches!(
            decode(&[0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02]),
            Err(DecodeError::KeyOrder { .. })
        ));
        // single precision float
        assert!(matches!(decode(&[0xfa, 0, 0, 0, 0]), Err(DecodeError::Unsupported(_))));
        // indefinite array
        assert_eq!(decode(&[0x9f, 0xff]), Err(DecodeError::Indefinite));
        // trailing byte
        assert_eq!(decode(&[0x01, 0x01]), Err(DecodeError::Trailing(1)));
        // array claims more items than bytes remain
        assert_eq!(decode(&[0x9a, 0xff, 0xff, 0xff, 0xff]), Err(DecodeError::Truncated));
        // non-text key
        assert_eq!(decode(&[0xa1, 0x01, 0x01]), Err(DecodeError::NonTextKey));
        // NaN
        assert_eq!(decode(&[0xfb, 0x7f, 0xf8, 0, 0, 0, 0, 0, 0]), Err(DecodeError::NonFiniteFloat));
    }

    #[test]
    fn value_map_helpers() {
        let mut v = Value::map().with("a", 1i64);
        v.insert("a", 2i64);
        assert_eq!(v.get("a"), Some(&Value::Int(2)));
        assert_eq!(v.remove("a"), Some(Value::Int(2)));
        assert!(!v.contains_key("a"));
    }
}
