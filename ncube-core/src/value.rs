//! Scalar value model shared by columns, coordinates and cells.
//!
//! `Value` is the closed set of things a coordinate, a column or a cell can
//! hold. `ValueType` is the declared type of an axis; every incoming
//! coordinate value is promoted to the axis type before binding.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{NCubeError, Result};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// ─── Points ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point3D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Latitude/longitude in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Haversine distance in kilometres.
    pub fn distance(&self, other: &LatLon) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

// ─── Value ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Date(DateTime<Utc>),
    Point2D(Point2D),
    Point3D(Point3D),
    LatLon(LatLon),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness applied to rule conditions.
    ///
    /// Null, false, numeric zero (any width), empty strings and empty
    /// collections are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Double(f) => *f != 0.0,
            Value::Decimal(d) => !d.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Date(_) | Value::Point2D(_) | Value::Point3D(_) | Value::LatLon(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Point2D(_) => "point2D",
            Value::Point3D(_) => "point3D",
            Value::LatLon(_) => "latLon",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            Value::Double(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(n) => Some(*n as f64),
            Value::Double(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_) | Value::Decimal(_))
    }

    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Long(n) => Some(Decimal::from(*n)),
            Value::Double(f) => Decimal::from_f64(*f),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Long(_) | Value::Double(_) | Value::Decimal(_) => 2,
            Value::String(_) => 3,
            Value::Date(_) => 4,
            Value::Point2D(_) => 5,
            Value::Point3D(_) => 6,
            Value::LatLon(_) => 7,
            Value::Bytes(_) => 8,
            Value::List(_) => 9,
            Value::Map(_) => 10,
        }
    }

    /// Total order used for sorting columns and matching ranges.
    ///
    /// Numbers compare across widths; otherwise values of different kinds
    /// order by kind.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        if self.is_numeric() && other.is_numeric() {
            if let (Some(a), Some(b)) = (self.as_decimal(), other.as_decimal()) {
                return a.cmp(&b);
            }
            let a = self.as_f64().unwrap_or(f64::NAN);
            let b = other.as_f64().unwrap_or(f64::NAN);
            return a.total_cmp(&b);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Point2D(a), Value::Point2D(b)) => {
                a.x.total_cmp(&b.x).then_with(|| a.y.total_cmp(&b.y))
            }
            (Value::Point3D(a), Value::Point3D(b)) => a
                .x
                .total_cmp(&b.x)
                .then_with(|| a.y.total_cmp(&b.y))
                .then_with(|| a.z.total_cmp(&b.z)),
            (Value::LatLon(a), Value::LatLon(b)) => a
                .lat
                .total_cmp(&b.lat)
                .then_with(|| a.lon.total_cmp(&b.lon)),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self
                .rank()
                .cmp(&other.rank())
                .then_with(|| self.canonical().cmp(&other.canonical())),
        }
    }

    /// Canonical string form used for hashing and discrete lookup keys.
    pub fn canonical(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Long(n) => n.to_string(),
            Value::Double(f) => f.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Value::Point2D(p) => format!("{},{}", p.x, p.y),
            Value::Point3D(p) => format!("{},{},{}", p.x, p.y, p.z),
            Value::LatLon(p) => format!("{},{}", p.lat, p.lon),
            Value::Bytes(b) => hex::encode(b),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::canonical).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v.canonical()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Long(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Point2D> for Value {
    fn from(p: Point2D) -> Self {
        Value::Point2D(p)
    }
}

impl From<Point3D> for Value {
    fn from(p: Point3D) -> Self {
        Value::Point3D(p)
    }
}

impl From<LatLon> for Value {
    fn from(p: LatLon) -> Self {
        Value::LatLon(p)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

// ─── ValueType ────────────────────────────────────────────────

/// Declared type of an axis' column values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    String,
    CiString,
    Long,
    Double,
    BigDecimal,
    Date,
    Comparable,
    Expression,
    #[serde(rename = "POINT2D")]
    Point2D,
    #[serde(rename = "POINT3D")]
    Point3D,
    #[serde(rename = "LATLON")]
    LatLon,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "STRING",
            ValueType::CiString => "CI_STRING",
            ValueType::Long => "LONG",
            ValueType::Double => "DOUBLE",
            ValueType::BigDecimal => "BIG_DECIMAL",
            ValueType::Date => "DATE",
            ValueType::Comparable => "COMPARABLE",
            ValueType::Expression => "EXPRESSION",
            ValueType::Point2D => "POINT2D",
            ValueType::Point3D => "POINT3D",
            ValueType::LatLon => "LATLON",
        }
    }

    /// Convert `value` to this type. `Null` passes through unchanged.
    pub fn promote(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let fail = || {
            NCubeError::invalid(format!(
                "cannot convert {} '{}' to {}",
                value.type_name(),
                value,
                self.as_str()
            ))
        };
        let promoted = match (self, value) {
            (ValueType::Expression, v) => v.clone(),
            (ValueType::Comparable, Value::List(_) | Value::Map(_)) => return Err(fail()),
            (ValueType::Comparable, v) => v.clone(),

            (ValueType::String | ValueType::CiString, Value::String(_)) => value.clone(),
            (
                ValueType::String | ValueType::CiString,
                Value::Bool(_) | Value::Long(_) | Value::Double(_) | Value::Decimal(_) | Value::Date(_),
            ) => Value::String(value.canonical()),

            (ValueType::Long, Value::Long(_)) => value.clone(),
            (ValueType::Long, Value::Double(f)) if f.is_finite() => Value::Long(f.trunc() as i64),
            (ValueType::Long, Value::Decimal(d)) => Value::Long(d.trunc().to_i64().ok_or_else(fail)?),
            (ValueType::Long, Value::String(s)) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(n) => Value::Long(n),
                    Err(_) => {
                        let f = s.parse::<f64>().map_err(|_| fail())?;
                        if !f.is_finite() {
                            return Err(fail());
                        }
                        Value::Long(f.trunc() as i64)
                    }
                }
            }

            (ValueType::Double, Value::Double(_)) => value.clone(),
            (ValueType::Double, Value::Long(_) | Value::Decimal(_)) => {
                Value::Double(value.as_f64().ok_or_else(fail)?)
            }
            (ValueType::Double, Value::String(s)) => {
                Value::Double(s.trim().parse::<f64>().map_err(|_| fail())?)
            }

            (ValueType::BigDecimal, Value::Decimal(_)) => value.clone(),
            (ValueType::BigDecimal, Value::Long(n)) => Value::Decimal(Decimal::from(*n)),
            (ValueType::BigDecimal, Value::Double(f)) => {
                Value::Decimal(Decimal::from_f64(*f).ok_or_else(fail)?)
            }
            (ValueType::BigDecimal, Value::String(s)) => {
                Value::Decimal(Decimal::from_str(s.trim()).map_err(|_| fail())?)
            }

            (ValueType::Date, Value::Date(_)) => value.clone(),
            (ValueType::Date, Value::Long(ms)) => Value::Date(
                Utc.timestamp_millis_opt(*ms)
                    .single()
                    .ok_or_else(fail)?,
            ),
            (ValueType::Date, Value::String(s)) => Value::Date(parse_date(s).ok_or_else(fail)?),

            (ValueType::Point2D, Value::Point2D(_)) => value.clone(),
            (ValueType::Point2D, Value::String(s)) => match parse_floats(s).as_deref() {
                Some([x, y]) => Value::Point2D(Point2D::new(*x, *y)),
                _ => return Err(fail()),
            },
            (ValueType::Point3D, Value::Point3D(_)) => value.clone(),
            (ValueType::Point3D, Value::String(s)) => match parse_floats(s).as_deref() {
                Some([x, y, z]) => Value::Point3D(Point3D::new(*x, *y, *z)),
                _ => return Err(fail()),
            },
            (ValueType::LatLon, Value::LatLon(_)) => value.clone(),
            (ValueType::LatLon, Value::String(s)) => match parse_floats(s).as_deref() {
                Some([lat, lon]) => Value::LatLon(LatLon::new(*lat, *lon)),
                _ => return Err(fail()),
            },
            _ => return Err(fail()),
        };
        Ok(promoted)
    }

    /// Order two already-promoted values of this type.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (self, a, b) {
            (ValueType::CiString, Value::String(x), Value::String(y)) => {
                x.to_lowercase().cmp(&y.to_lowercase())
            }
            _ => a.total_cmp(b),
        }
    }

    /// Exact-match key for discrete lookup.
    pub fn key(&self, value: &Value) -> String {
        match self {
            ValueType::CiString => value.canonical().to_lowercase(),
            _ => value.canonical(),
        }
    }

    /// Distance between two promoted values, used by nearest axes.
    pub fn distance(&self, a: &Value, b: &Value) -> Option<f64> {
        match (a, b) {
            (Value::Point2D(p), Value::Point2D(q)) => Some(p.distance(q)),
            (Value::Point3D(p), Value::Point3D(q)) => Some(p.distance(q)),
            (Value::LatLon(p), Value::LatLon(q)) => Some(p.distance(q)),
            (Value::Date(x), Value::Date(y)) => {
                Some((x.timestamp_millis() - y.timestamp_millis()).abs() as f64)
            }
            (Value::String(x), Value::String(y)) => {
                if *self == ValueType::CiString {
                    Some(strsim::levenshtein(&x.to_lowercase(), &y.to_lowercase()) as f64)
                } else {
                    Some(strsim::levenshtein(x, y) as f64)
                }
            }
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Some((x - y).abs()),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = NCubeError;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = match s.to_ascii_uppercase().as_str() {
            "STRING" => ValueType::String,
            "CI_STRING" => ValueType::CiString,
            "LONG" => ValueType::Long,
            "DOUBLE" => ValueType::Double,
            "BIG_DECIMAL" => ValueType::BigDecimal,
            "DATE" => ValueType::Date,
            "COMPARABLE" => ValueType::Comparable,
            "EXPRESSION" => ValueType::Expression,
            "POINT2D" => ValueType::Point2D,
            "POINT3D" => ValueType::Point3D,
            "LATLON" => ValueType::LatLon,
            other => return Err(NCubeError::invalid(format!("unknown value type: {other}"))),
        };
        Ok(parsed)
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?))
}

fn parse_floats(s: &str) -> Option<Vec<f64>> {
    s.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Long(0).is_truthy());
        assert!(Value::Long(-3).is_truthy());
        assert!(!Value::Double(0.0).is_truthy());
        assert!(!Value::Decimal(Decimal::ZERO).is_truthy());
        assert!(Value::Decimal(Decimal::new(1, 2)).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(!Value::Map(BTreeMap::new()).is_truthy());
        assert!(Value::Point2D(Point2D::new(0.0, 0.0)).is_truthy());
    }

    #[test]
    fn promote_string_to_long() {
        let v = ValueType::Long.promote(&Value::from("42")).unwrap();
        assert_eq!(v, Value::Long(42));
        let v = ValueType::Long.promote(&Value::Double(7.9)).unwrap();
        assert_eq!(v, Value::Long(7));
        assert!(ValueType::Long.promote(&Value::from("abc")).is_err());
        assert!(ValueType::Long.promote(&Value::Bool(true)).is_err());
    }

    #[test]
    fn promote_numbers_to_string() {
        assert_eq!(
            ValueType::String.promote(&Value::Long(10)).unwrap(),
            Value::from("10")
        );
    }

    #[test]
    fn promote_dates() {
        let d = ValueType::Date.promote(&Value::from("2024-03-01")).unwrap();
        let Value::Date(d) = d else { panic!("expected date") };
        assert_eq!(d.to_rfc3339_opts(SecondsFormat::Secs, true), "2024-03-01T00:00:00Z");
        let ms = ValueType::Date.promote(&Value::Long(0)).unwrap();
        assert_eq!(ms.canonical(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn promote_points() {
        assert_eq!(
            ValueType::Point2D.promote(&Value::from("(1.5, 2)")).unwrap(),
            Value::Point2D(Point2D::new(1.5, 2.0))
        );
        assert!(ValueType::Point3D.promote(&Value::from("1,2")).is_err());
    }

    #[test]
    fn numeric_comparison_crosses_widths() {
        assert_eq!(Value::Long(2).total_cmp(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(
            Value::Decimal(Decimal::new(25, 1)).total_cmp(&Value::Double(2.5)),
            Ordering::Equal
        );
    }

    #[test]
    fn ci_string_key_and_compare() {
        let vt = ValueType::CiString;
        assert_eq!(vt.key(&Value::from("OHio")), "ohio");
        assert_eq!(
            vt.compare(&Value::from("abc"), &Value::from("ABC")),
            Ordering::Equal
        );
    }

    #[test]
    fn distances() {
        let vt = ValueType::LatLon;
        let cle = Value::LatLon(LatLon::new(41.4993, -81.6944));
        let cmh = Value::LatLon(LatLon::new(39.9612, -82.9988));
        let km = vt.distance(&cle, &cmh).unwrap();
        assert!((km - 203.0).abs() < 5.0, "got {km}");
        assert_eq!(
            ValueType::String.distance(&Value::from("kitten"), &Value::from("sitting")),
            Some(3.0)
        );
        assert_eq!(
            ValueType::Long.distance(&Value::Long(3), &Value::Long(10)),
            Some(7.0)
        );
    }

    #[test]
    fn value_json_is_tagged() {
        let json = serde_json::to_string(&Value::Long(5)).unwrap();
        assert_eq!(json, r#"{"type":"long","value":5}"#);
        let bytes = serde_json::to_string(&Value::Bytes(vec![0xca, 0xfe])).unwrap();
        assert_eq!(bytes, r#"{"type":"bytes","value":"cafe"}"#);
        let back: Value = serde_json::from_str(&bytes).unwrap();
        assert_eq!(back, Value::Bytes(vec![0xca, 0xfe]));
    }

    #[test]
    fn value_type_names_round_trip() {
        for vt in [ValueType::CiString, ValueType::BigDecimal, ValueType::Point2D] {
            assert_eq!(vt.as_str().parse::<ValueType>().unwrap(), vt);
            let json = serde_json::to_string(&vt).unwrap();
            assert_eq!(json, format!("\"{}\"", vt.as_str()));
        }
    }
}
