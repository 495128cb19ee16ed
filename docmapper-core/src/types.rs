//! Declared key types and value coercion.
//!
//! Every write to a declared key passes through [`KeyType::coerce`]. Coercion never
//! fails: unparsable numeric or date input degrades to `Bson::Null`, strings and
//! booleans fall back to a best-effort value.

use bson::{Binary, Bson, DateTime, Uuid, spec::BinarySubtype};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::{fmt, sync::Arc};

/// A user supplied type with its own pair of conversions.
///
/// `from_storage` is applied on every write (and when hydrating), `to_storage`
/// when the document is written to the store.
pub trait CustomType: Send + Sync {
    /// Name used in debug output.
    fn name(&self) -> &str;

    /// Converts the in-memory value into its stored form.
    fn to_storage(&self, value: &Bson) -> Bson;

    /// Converts a raw or stored value into the in-memory form.
    fn from_storage(&self, value: Bson) -> Bson;
}

/// The declared type of a key.
#[derive(Clone)]
pub enum KeyType {
    String,
    Integer,
    Float,
    Boolean,
    /// A calendar date, held as a UTC midnight timestamp.
    Date,
    Time,
    Array,
    Hash,
    /// An identity reference (the type of `_id` and of foreign keys).
    ObjectId,
    Custom(Arc<dyn CustomType>),
}

impl fmt::Debug for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::String => write!(f, "String"),
            KeyType::Integer => write!(f, "Integer"),
            KeyType::Float => write!(f, "Float"),
            KeyType::Boolean => write!(f, "Boolean"),
            KeyType::Date => write!(f, "Date"),
            KeyType::Time => write!(f, "Time"),
            KeyType::Array => write!(f, "Array"),
            KeyType::Hash => write!(f, "Hash"),
            KeyType::ObjectId => write!(f, "ObjectId"),
            KeyType::Custom(custom) => write!(f, "Custom({})", custom.name()),
        }
    }
}

impl KeyType {
    /// Wraps a custom type implementation.
    pub fn custom(custom: impl CustomType + 'static) -> Self {
        KeyType::Custom(Arc::new(custom))
    }

    /// Coerces a raw value into this type.
    pub fn coerce(&self, raw: Bson) -> Bson {
        if matches!(raw, Bson::Null | Bson::Undefined) {
            return Bson::Null;
        }

        match self {
            KeyType::String => coerce_string(raw),
            KeyType::Integer => coerce_integer(&raw),
            KeyType::Float => coerce_float(&raw),
            KeyType::Boolean => coerce_boolean(&raw),
            KeyType::Date => coerce_time(&raw)
                .map(truncate_to_date)
                .map(Bson::DateTime)
                .unwrap_or(Bson::Null),
            KeyType::Time => coerce_time(&raw)
                .map(Bson::DateTime)
                .unwrap_or(Bson::Null),
            KeyType::Array | KeyType::Hash => raw,
            KeyType::ObjectId => id_from_bson(&raw)
                .map(id_to_bson)
                .unwrap_or(Bson::Null),
            KeyType::Custom(custom) => custom.from_storage(raw),
        }
    }

    /// Converts an in-memory value into the form written to the store.
    pub fn to_storage(&self, value: &Bson) -> Bson {
        match self {
            KeyType::Custom(custom) if !matches!(value, Bson::Null) => custom.to_storage(value),
            _ => value.clone(),
        }
    }

    /// Converts a stored value back into the in-memory form.
    pub fn from_storage(&self, stored: Bson) -> Bson {
        self.coerce(stored)
    }

    /// Whether values of this type support numeric modifiers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, KeyType::Integer | KeyType::Float)
    }
}

/// Generates a new identity.
///
/// Identities are time-ordered, so sorting by `_id` follows creation order.
pub fn new_id() -> Uuid {
    uuid::Uuid::now_v7().into()
}

/// Builds the stored representation of an identity.
pub fn id_to_bson(id: Uuid) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.bytes().to_vec(),
    })
}

/// Reads an identity from either its binary form or its canonical string form.
pub fn id_from_bson(value: &Bson) -> Option<Uuid> {
    match value {
        Bson::Binary(binary) if binary.bytes.len() == 16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&binary.bytes);
            Some(Uuid::from_bytes(bytes))
        }
        Bson::String(s) => Uuid::parse_str(s.trim()).ok(),
        _ => None,
    }
}

fn coerce_string(raw: Bson) -> Bson {
    match raw {
        Bson::String(_) => raw,
        Bson::Int32(v) => Bson::String(v.to_string()),
        Bson::Int64(v) => Bson::String(v.to_string()),
        Bson::Double(v) => Bson::String(v.to_string()),
        Bson::Boolean(v) => Bson::String(v.to_string()),
        Bson::Symbol(s) => Bson::String(s),
        Bson::DateTime(dt) => Bson::String(
            chrono::DateTime::from_timestamp_millis(dt.timestamp_millis())
                .map(|utc| utc.to_rfc3339())
                .unwrap_or_else(|| dt.timestamp_millis().to_string()),
        ),
        Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
        ref binary @ Bson::Binary(_) => match id_from_bson(binary) {
            Some(id) => Bson::String(id.to_string()),
            None => Bson::String(binary.to_string()),
        },
        other => Bson::String(other.to_string()),
    }
}

fn coerce_integer(raw: &Bson) -> Bson {
    match raw {
        Bson::Int32(v) => Bson::Int64(*v as i64),
        Bson::Int64(v) => Bson::Int64(*v),
        Bson::Double(v) if v.is_finite() => Bson::Int64(v.trunc() as i64),
        Bson::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Bson::Int64(v),
                Err(_) => match s.parse::<f64>() {
                    Ok(v) if v.is_finite() => Bson::Int64(v.trunc() as i64),
                    _ => Bson::Null,
                },
            }
        }
        _ => Bson::Null,
    }
}

fn coerce_float(raw: &Bson) -> Bson {
    match raw {
        Bson::Int32(v) => Bson::Double(*v as f64),
        Bson::Int64(v) => Bson::Double(*v as f64),
        Bson::Double(v) => Bson::Double(*v),
        Bson::String(s) => match s.trim().parse::<f64>() {
            Ok(v) => Bson::Double(v),
            Err(_) => Bson::Null,
        },
        _ => Bson::Null,
    }
}

const FALSE_STRINGS: [&str; 7] = ["false", "f", "no", "n", "0", "off", "0.0"];

fn coerce_boolean(raw: &Bson) -> Bson {
    match raw {
        Bson::Boolean(v) => Bson::Boolean(*v),
        Bson::Int32(v) => Bson::Boolean(*v != 0),
        Bson::Int64(v) => Bson::Boolean(*v != 0),
        Bson::Double(v) => Bson::Boolean(*v != 0.0),
        Bson::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            if s.is_empty() {
                Bson::Null
            } else {
                Bson::Boolean(!FALSE_STRINGS.contains(&s.as_str()))
            }
        }
        _ => Bson::Boolean(true),
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"];

fn coerce_time(raw: &Bson) -> Option<DateTime> {
    match raw {
        Bson::DateTime(dt) => Some(*dt),
        Bson::Int32(secs) => Some(DateTime::from_millis(*secs as i64 * 1000)),
        Bson::Int64(secs) => secs.checked_mul(1000).map(DateTime::from_millis),
        Bson::Double(secs) if secs.is_finite() => {
            Some(DateTime::from_millis((secs * 1000.0).trunc() as i64))
        }
        Bson::String(s) => parse_time(s.trim()),
        _ => None,
    }
}

fn parse_time(s: &str) -> Option<DateTime> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(DateTime::from_millis(parsed.timestamp_millis()));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(DateTime::from_millis(Utc.from_utc_datetime(&naive).timestamp_millis()));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(DateTime::from_millis(Utc.from_utc_datetime(&midnight).timestamp_millis()));
        }
    }

    None
}

fn truncate_to_date(dt: DateTime) -> DateTime {
    const DAY_MILLIS: i64 = 86_400_000;
    DateTime::from_millis(dt.timestamp_millis().div_euclid(DAY_MILLIS) * DAY_MILLIS)
}
