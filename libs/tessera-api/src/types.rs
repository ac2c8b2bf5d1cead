use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use bytes::Bytes;
use num_bigint::{BigInt, Sign};
use uuid::Uuid;

use crate::error::UnknownType;

// ═══════════════════════════════════════════════════════════════
//  LogicalType
// ═══════════════════════════════════════════════════════════════

/// Column and parameter data kinds understood by the codec.
///
/// Closed set: each variant fixes one wire encoding. Server-side aliases
/// (`varchar`, `ascii`, `counter`, `timeuuid`) fold into the variant that
/// shares their encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    /// 32-bit signed integer (`int`).
    Int,
    /// 64-bit signed integer (`bigint`).
    BigInt,
    Float,
    Double,
    /// Scale plus arbitrary-precision unscaled value.
    Decimal,
    /// Arbitrary-precision integer.
    VarInt,
    Text,
    Blob,
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp,
    Uuid,
    Inet,
    List(Box<LogicalType>),
    Set(Box<LogicalType>),
    Map(Box<LogicalType>, Box<LogicalType>),
}

impl LogicalType {
    pub fn list(element: LogicalType) -> Self {
        Self::List(Box::new(element))
    }

    pub fn set(element: LogicalType) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn map(key: LogicalType, value: LogicalType) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// Payload width for fixed-size scalars, `None` for variable-length types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            Self::Int | Self::Float => Some(4),
            Self::BigInt | Self::Double | Self::Timestamp => Some(8),
            Self::Uuid => Some(16),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(..))
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::Int => f.write_str("int"),
            Self::BigInt => f.write_str("bigint"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::Decimal => f.write_str("decimal"),
            Self::VarInt => f.write_str("varint"),
            Self::Text => f.write_str("text"),
            Self::Blob => f.write_str("blob"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Uuid => f.write_str("uuid"),
            Self::Inet => f.write_str("inet"),
            Self::List(e) => write!(f, "list<{e}>"),
            Self::Set(e) => write!(f, "set<{e}>"),
            Self::Map(k, v) => write!(f, "map<{k}, {v}>"),
        }
    }
}

impl FromStr for LogicalType {
    type Err = UnknownType;

    /// Parse a CQL type name such as `bigint`, `list<int>` or
    /// `frozen<map<text, uuid>>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unknown = || UnknownType(s.to_string());

        if let Some((outer, inner)) = split_generic(s) {
            let args = split_top_level(inner);
            return match (outer.to_ascii_lowercase().as_str(), args.as_slice()) {
                ("frozen", [t]) => t.parse(),
                ("list", [t]) => Ok(Self::list(t.parse()?)),
                ("set", [t]) => Ok(Self::set(t.parse()?)),
                ("map", [k, v]) => Ok(Self::map(k.parse()?, v.parse()?)),
                _ => Err(unknown()),
            };
        }

        match s.to_ascii_lowercase().as_str() {
            "boolean" => Ok(Self::Boolean),
            "int" => Ok(Self::Int),
            "bigint" | "counter" => Ok(Self::BigInt),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "decimal" => Ok(Self::Decimal),
            "varint" => Ok(Self::VarInt),
            "text" | "varchar" | "ascii" => Ok(Self::Text),
            "blob" => Ok(Self::Blob),
            "timestamp" => Ok(Self::Timestamp),
            "uuid" | "timeuuid" => Ok(Self::Uuid),
            "inet" => Ok(Self::Inet),
            _ => Err(unknown()),
        }
    }
}

/// `list<int>` → `("list", "int")`.
fn split_generic(s: &str) -> Option<(&str, &str)> {
    let open = s.find('<')?;
    if !s.ends_with('>') {
        return None;
    }
    Some((s[..open].trim(), &s[open + 1..s.len() - 1]))
}

/// Split on commas that are not nested inside `<...>`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

// ═══════════════════════════════════════════════════════════════
//  Decimal
// ═══════════════════════════════════════════════════════════════

/// Arbitrary-precision decimal: `unscaled × 10^-scale`.
///
/// Equality is structural: `1.0` (10, 1) and `1.00` (100, 2) differ, the
/// same way they differ on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    unscaled: BigInt,
    scale: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal literal: {0}")]
pub struct InvalidDecimal(pub String);

impl Decimal {
    pub fn new(unscaled: impl Into<BigInt>, scale: i32) -> Self {
        Self {
            unscaled: unscaled.into(),
            scale,
        }
    }

    pub fn unscaled(&self) -> &BigInt {
        &self.unscaled
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.magnitude().to_string();
        let sign = if self.unscaled.sign() == Sign::Minus { "-" } else { "" };

        if self.scale <= 0 {
            let zeros = if self.unscaled.sign() == Sign::NoSign {
                0
            } else {
                self.scale.unsigned_abs() as usize
            };
            return write!(f, "{sign}{digits}{}", "0".repeat(zeros));
        }

        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{digits}", "0".repeat(scale + 1 - digits.len()))
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = InvalidDecimal;

    /// Parse plain decimal notation (`-8.10101`, `42`, `.5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidDecimal(s.to_string());
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let digits = format!("{int_part}{frac_part}");
        let mut unscaled = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(invalid)?;
        if negative {
            unscaled = -unscaled;
        }
        let scale = i32::try_from(frac_part.len()).map_err(|_| invalid())?;
        Ok(Self { unscaled, scale })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Value
// ═══════════════════════════════════════════════════════════════

/// A value tagged with its logical type, or `Null`.
///
/// `Null` conforms to every type; any column is nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    VarInt(BigInt),
    Text(String),
    Blob(Bytes),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
    Uuid(Uuid),
    Inet(IpAddr),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Exact tag check against a declared type. No numeric widening: an
    /// `Int` value does not conform to `BigInt`.
    ///
    /// Collection elements must conform and must not be null.
    pub fn conforms_to(&self, ty: &LogicalType) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::Boolean(_), LogicalType::Boolean)
            | (Value::Int(_), LogicalType::Int)
            | (Value::BigInt(_), LogicalType::BigInt)
            | (Value::Float(_), LogicalType::Float)
            | (Value::Double(_), LogicalType::Double)
            | (Value::Decimal(_), LogicalType::Decimal)
            | (Value::VarInt(_), LogicalType::VarInt)
            | (Value::Text(_), LogicalType::Text)
            | (Value::Blob(_), LogicalType::Blob)
            | (Value::Timestamp(_), LogicalType::Timestamp)
            | (Value::Uuid(_), LogicalType::Uuid)
            | (Value::Inet(_), LogicalType::Inet) => true,
            (Value::List(items), LogicalType::List(elem))
            | (Value::Set(items), LogicalType::Set(elem)) => {
                items.iter().all(|v| !v.is_null() && v.conforms_to(elem))
            }
            (Value::Map(entries), LogicalType::Map(kt, vt)) => entries.iter().all(|(k, v)| {
                !k.is_null() && !v.is_null() && k.conforms_to(kt) && v.conforms_to(vt)
            }),
            _ => false,
        }
    }

    /// Human-readable tag, used in type mismatch reports.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Boolean(_) => LogicalType::Boolean.to_string(),
            Value::Int(_) => LogicalType::Int.to_string(),
            Value::BigInt(_) => LogicalType::BigInt.to_string(),
            Value::Float(_) => LogicalType::Float.to_string(),
            Value::Double(_) => LogicalType::Double.to_string(),
            Value::Decimal(_) => LogicalType::Decimal.to_string(),
            Value::VarInt(_) => LogicalType::VarInt.to_string(),
            Value::Text(_) => LogicalType::Text.to_string(),
            Value::Blob(_) => LogicalType::Blob.to_string(),
            Value::Timestamp(_) => LogicalType::Timestamp.to_string(),
            Value::Uuid(_) => LogicalType::Uuid.to_string(),
            Value::Inet(_) => LogicalType::Inet.to_string(),
            Value::List(items) => match items.first() {
                Some(v) => format!("list<{}>", v.type_name()),
                None => "list".to_string(),
            },
            Value::Set(items) => match items.first() {
                Some(v) => format!("set<{}>", v.type_name()),
                None => "set".to_string(),
            },
            Value::Map(entries) => match entries.first() {
                Some((k, v)) => format!("map<{}, {}>", k.type_name(), v.type_name()),
                None => "map".to_string(),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::VarInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(Bytes::from(v))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<IpAddr> for Value {
    fn from(v: IpAddr) -> Self {
        Value::Inet(v)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(v: Ipv4Addr) -> Self {
        Value::Inet(IpAddr::V4(v))
    }
}

impl From<Ipv6Addr> for Value {
    fn from(v: Ipv6Addr) -> Self {
        Value::Inet(IpAddr::V6(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ═══════════════════════════════════════════════════════════════
//  FromValue: explicit typed extraction
// ═══════════════════════════════════════════════════════════════

/// Extract a native value from a decoded `Value` without coercion.
///
/// Returns `None` when the tag differs. `i64` accepts both `bigint` and
/// `timestamp`, which share their native representation.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($ty:ty, $($variant:ident)|+) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    $(Value::$variant(v) => Some(v.clone()),)+
                    _ => None,
                }
            }
        }
    };
}

impl_from_value!(bool, Boolean);
impl_from_value!(i32, Int);
impl_from_value!(i64, BigInt | Timestamp);
impl_from_value!(f32, Float);
impl_from_value!(f64, Double);
impl_from_value!(Decimal, Decimal);
impl_from_value!(BigInt, VarInt);
impl_from_value!(String, Text);
impl_from_value!(Bytes, Blob);
impl_from_value!(Uuid, Uuid);
impl_from_value!(IpAddr, Inet);

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) | Value::Set(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_type_names() {
        assert_eq!("int".parse(), Ok(LogicalType::Int));
        assert_eq!("VARCHAR".parse(), Ok(LogicalType::Text));
        assert_eq!(
            "frozen<map<text, list<bigint>>>".parse(),
            Ok(LogicalType::map(LogicalType::Text, LogicalType::list(LogicalType::BigInt)))
        );
        assert!("tuple<int, int>".parse::<LogicalType>().is_err());
        assert!("map<int>".parse::<LogicalType>().is_err());
    }

    #[test]
    fn type_display_matches_parse() {
        let ty = LogicalType::map(LogicalType::Uuid, LogicalType::set(LogicalType::Inet));
        assert_eq!(ty.to_string(), "map<uuid, set<inet>>");
        assert_eq!(ty.to_string().parse(), Ok(ty));
    }

    #[test]
    fn decimal_text_round_trip() {
        let d: Decimal = "-8.10101".parse().unwrap();
        assert_eq!(d.unscaled(), &BigInt::from(-810101));
        assert_eq!(d.scale(), 5);
        assert_eq!(d.to_string(), "-8.10101");

        assert_eq!(Decimal::new(5, 3).to_string(), "0.005");
        assert_eq!(Decimal::new(-12, 0).to_string(), "-12");
        assert_eq!(Decimal::new(7, -2).to_string(), "700");
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("-".parse::<Decimal>().is_err());
    }

    #[test]
    fn conformance_is_exact() {
        assert!(Value::Int(1).conforms_to(&LogicalType::Int));
        assert!(!Value::Int(1).conforms_to(&LogicalType::BigInt));
        assert!(!Value::Text("1".into()).conforms_to(&LogicalType::Int));
        assert!(Value::Null.conforms_to(&LogicalType::Int));
        assert!(Value::List(vec![]).conforms_to(&LogicalType::list(LogicalType::Text)));
        assert!(!Value::List(vec![Value::Null]).conforms_to(&LogicalType::list(LogicalType::Int)));
        assert!(!Value::Set(vec![Value::Int(1)]).conforms_to(&LogicalType::list(LogicalType::Int)));
    }

    #[test]
    fn typed_extraction_does_not_coerce() {
        assert_eq!(i32::from_value(&Value::Int(3)), Some(3));
        assert_eq!(i64::from_value(&Value::Int(3)), None);
        assert_eq!(i64::from_value(&Value::Timestamp(9)), Some(9));
        assert_eq!(Option::<String>::from_value(&Value::Null), Some(None));
        assert_eq!(
            Vec::<i32>::from_value(&Value::List(vec![Value::Int(1), Value::Int(2)])),
            Some(vec![1, 2])
        );
    }
}
