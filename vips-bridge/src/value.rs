//! Typed values and their engine property representation.
//!
//! [`ValueBox`] is the caller-facing closed union of every value kind the
//! engine's property system can carry. [`PropertyValue`] is what actually
//! crosses into the engine, and [`PropertyType`] is the engine's declared
//! schema type for a property. Conversions between them are total over the
//! kinds and never clamp, wrap or truncate: anything that does not fit is a
//! [`VipsError::Marshal`].
//!
//! The engine stores integers as 32 bits, so `ValueBox::Int` (64 bits on the
//! caller side) is the one kind whose engine representation is narrower.

use crate::error::{Result, VipsError};
use crate::image::{BandFormat, Coding, ImageHandle, Interpretation};
use std::ffi::CString;
use std::fmt;

/// Largest integer magnitude a double holds exactly.
const MAX_EXACT_DOUBLE_INT: u64 = 1 << 53;

/// Discriminator of a [`ValueBox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Double,
    Bool,
    String,
    Enum,
    Blob,
    DoubleArray,
    Image,
}

impl ValueKind {
    /// The engine property type that holds this kind natively.
    pub fn property_type(self) -> PropertyType {
        match self {
            ValueKind::Int => PropertyType::Int,
            ValueKind::Double => PropertyType::Double,
            ValueKind::Bool => PropertyType::Bool,
            ValueKind::String => PropertyType::String,
            ValueKind::Enum => PropertyType::Enum,
            ValueKind::Blob => PropertyType::Blob,
            ValueKind::DoubleArray => PropertyType::DoubleArray,
            ValueKind::Image => PropertyType::Image,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int => "int",
            ValueKind::Double => "double",
            ValueKind::Bool => "bool",
            ValueKind::String => "string",
            ValueKind::Enum => "enum",
            ValueKind::Blob => "blob",
            ValueKind::DoubleArray => "array of double",
            ValueKind::Image => "image",
        };
        f.write_str(name)
    }
}

/// Declared type of an engine property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Int,
    Double,
    Bool,
    String,
    Enum,
    Blob,
    DoubleArray,
    Image,
    /// A type the bridge does not marshal, by engine type name.
    Unsupported(String),
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyType::Int => f.write_str("int"),
            PropertyType::Double => f.write_str("double"),
            PropertyType::Bool => f.write_str("bool"),
            PropertyType::String => f.write_str("string"),
            PropertyType::Enum => f.write_str("enum"),
            PropertyType::Blob => f.write_str("blob"),
            PropertyType::DoubleArray => f.write_str("array of double"),
            PropertyType::Image => f.write_str("image"),
            PropertyType::Unsupported(name) => write!(f, "unsupported type {}", name),
        }
    }
}

/// A value in the engine's property representation.
///
/// `String`, `Blob` and `Image` payloads are copies (or extra references)
/// owned by whoever holds the `PropertyValue`; dropping it frees them.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Double(f64),
    Bool(bool),
    String(CString),
    Enum(i32),
    Blob(Vec<u8>),
    DoubleArray(Vec<f64>),
    Image(ImageHandle),
}

impl PropertyValue {
    /// The engine type this value occupies.
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Int(_) => PropertyType::Int,
            PropertyValue::Double(_) => PropertyType::Double,
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Enum(_) => PropertyType::Enum,
            PropertyValue::Blob(_) => PropertyType::Blob,
            PropertyValue::DoubleArray(_) => PropertyType::DoubleArray,
            PropertyValue::Image(_) => PropertyType::Image,
        }
    }
}

/// A caller value of one of the supported kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueBox {
    Int(i64),
    Double(f64),
    Bool(bool),
    String(String),
    Enum(i32),
    Blob(Vec<u8>),
    DoubleArray(Vec<f64>),
    Image(ImageHandle),
}

impl ValueBox {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueBox::Int(_) => ValueKind::Int,
            ValueBox::Double(_) => ValueKind::Double,
            ValueBox::Bool(_) => ValueKind::Bool,
            ValueBox::String(_) => ValueKind::String,
            ValueBox::Enum(_) => ValueKind::Enum,
            ValueBox::Blob(_) => ValueKind::Blob,
            ValueBox::DoubleArray(_) => ValueKind::DoubleArray,
            ValueBox::Image(_) => ValueKind::Image,
        }
    }

    /// Convert into the representation of a property declared as `target`.
    ///
    /// String, blob and image kinds produce copies (or a retained reference)
    /// that live as long as the returned value.
    pub fn serialize(&self, target: &PropertyType) -> Result<PropertyValue> {
        match (self, target) {
            (ValueBox::Int(v), PropertyType::Int) => i32::try_from(*v)
                .map(PropertyValue::Int)
                .map_err(|_| VipsError::marshal(format!("int {} out of range for engine int", v))),
            (ValueBox::Int(v), PropertyType::Double) => {
                if v.unsigned_abs() <= MAX_EXACT_DOUBLE_INT {
                    Ok(PropertyValue::Double(*v as f64))
                } else {
                    Err(VipsError::marshal(format!(
                        "int {} is not exactly representable as double",
                        v
                    )))
                }
            }
            (ValueBox::Double(v), PropertyType::Double) => Ok(PropertyValue::Double(*v)),
            (ValueBox::Bool(v), PropertyType::Bool) => Ok(PropertyValue::Bool(*v)),
            (ValueBox::String(v), PropertyType::String) => CString::new(v.as_bytes())
                .map(PropertyValue::String)
                .map_err(|_| VipsError::marshal("string contains an interior NUL byte")),
            (ValueBox::Enum(v), PropertyType::Enum) => Ok(PropertyValue::Enum(*v)),
            (ValueBox::Blob(v), PropertyType::Blob) => Ok(PropertyValue::Blob(v.clone())),
            (ValueBox::DoubleArray(v), PropertyType::DoubleArray) => {
                Ok(PropertyValue::DoubleArray(v.clone()))
            }
            (ValueBox::Image(v), PropertyType::Image) => Ok(PropertyValue::Image(v.clone())),
            (value, PropertyType::Unsupported(name)) => Err(VipsError::marshal(format!(
                "cannot set {} on a property of unsupported type {}",
                value.kind(),
                name
            ))),
            (value, target) => Err(VipsError::marshal(format!(
                "cannot convert {} to {}",
                value.kind(),
                target
            ))),
        }
    }

    /// Convert an engine property value back into a value of kind `expected`.
    pub fn deserialize(value: PropertyValue, expected: ValueKind) -> Result<ValueBox> {
        match (value, expected) {
            (PropertyValue::Int(v), ValueKind::Int) => Ok(ValueBox::Int(i64::from(v))),
            (PropertyValue::Double(v), ValueKind::Double) => Ok(ValueBox::Double(v)),
            (PropertyValue::Bool(v), ValueKind::Bool) => Ok(ValueBox::Bool(v)),
            (PropertyValue::String(v), ValueKind::String) => v
                .into_string()
                .map(ValueBox::String)
                .map_err(|_| VipsError::marshal("engine string is not valid UTF-8")),
            (PropertyValue::Enum(v), ValueKind::Enum) => Ok(ValueBox::Enum(v)),
            (PropertyValue::Blob(v), ValueKind::Blob) => Ok(ValueBox::Blob(v)),
            (PropertyValue::DoubleArray(v), ValueKind::DoubleArray) => {
                Ok(ValueBox::DoubleArray(v))
            }
            (PropertyValue::Image(v), ValueKind::Image) => Ok(ValueBox::Image(v)),
            (value, expected) => Err(VipsError::marshal(format!(
                "expected {} but the engine returned {}",
                expected,
                value.property_type()
            ))),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ValueBox::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ValueBox::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ValueBox::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueBox::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<i32> {
        match self {
            ValueBox::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            ValueBox::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double_array(&self) -> Option<&[f64]> {
        match self {
            ValueBox::DoubleArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageHandle> {
        match self {
            ValueBox::Image(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i32> for ValueBox {
    fn from(v: i32) -> Self {
        ValueBox::Int(i64::from(v))
    }
}

impl From<i64> for ValueBox {
    fn from(v: i64) -> Self {
        ValueBox::Int(v)
    }
}

impl From<f64> for ValueBox {
    fn from(v: f64) -> Self {
        ValueBox::Double(v)
    }
}

impl From<bool> for ValueBox {
    fn from(v: bool) -> Self {
        ValueBox::Bool(v)
    }
}

impl From<&str> for ValueBox {
    fn from(v: &str) -> Self {
        ValueBox::String(v.to_string())
    }
}

impl From<String> for ValueBox {
    fn from(v: String) -> Self {
        ValueBox::String(v)
    }
}

impl From<Vec<u8>> for ValueBox {
    fn from(v: Vec<u8>) -> Self {
        ValueBox::Blob(v)
    }
}

impl From<&[u8]> for ValueBox {
    fn from(v: &[u8]) -> Self {
        ValueBox::Blob(v.to_vec())
    }
}

impl From<Vec<f64>> for ValueBox {
    fn from(v: Vec<f64>) -> Self {
        ValueBox::DoubleArray(v)
    }
}

impl From<&[f64]> for ValueBox {
    fn from(v: &[f64]) -> Self {
        ValueBox::DoubleArray(v.to_vec())
    }
}

impl From<ImageHandle> for ValueBox {
    fn from(v: ImageHandle) -> Self {
        ValueBox::Image(v)
    }
}

impl From<&ImageHandle> for ValueBox {
    fn from(v: &ImageHandle) -> Self {
        ValueBox::Image(v.clone())
    }
}

impl From<BandFormat> for ValueBox {
    fn from(v: BandFormat) -> Self {
        ValueBox::Enum(v.to_raw())
    }
}

impl From<Coding> for ValueBox {
    fn from(v: Coding) -> Self {
        ValueBox::Enum(v.to_raw())
    }
}

impl From<Interpretation> for ValueBox {
    fn from(v: Interpretation) -> Self {
        ValueBox::Enum(v.to_raw())
    }
}
