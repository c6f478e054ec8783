//! # Field Values
//!
//! The value type carried by the flat `key → value` view of a snapshot.

use std::fmt;

/// Decoded or derived value of one snapshot key.
///
/// | Variant | Produced by |
/// |---------|-------------|
/// | Int | unscaled registers, derived minutes/hours, counts |
/// | Float | ×0.1 fixed-point registers |
/// | Text | mode label, away-window timestamps |
///
/// # Example
///
/// ```rust
/// use futura_modbus::FieldValue;
///
/// let temp = FieldValue::Float(21.5);
/// assert_eq!(temp.as_f64(), Some(21.5));
/// assert_eq!(temp.to_string(), "21.5");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view; `None` for text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Integer view; `None` for floats and text
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Text(_))
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    Self::Int(v as i64)
                }
            }
        )*
    };
}

impl_from_int!(u8, u16, i16, u32, i32, i64, usize);

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views() {
        assert_eq!(FieldValue::Int(-5).as_f64(), Some(-5.0));
        assert_eq!(FieldValue::Int(-5).as_i64(), Some(-5));
        assert_eq!(FieldValue::Float(2.5).as_i64(), None);
        assert_eq!(FieldValue::from("Auto").as_str(), Some("Auto"));
        assert_eq!(FieldValue::from("Auto").as_f64(), None);
        assert!(!FieldValue::from("Auto").is_numeric());
    }

    #[test]
    fn test_display() {
        assert_eq!(FieldValue::from(1200u16).to_string(), "1200");
        assert_eq!(FieldValue::Float(-3.2).to_string(), "-3.2");
        assert_eq!(FieldValue::from("Not set").to_string(), "Not set");
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(FieldValue::from(0xFFFF_FFFFu32), FieldValue::Int(4_294_967_295));
        assert_eq!(FieldValue::from(-32768i16), FieldValue::Int(-32768));
        assert_eq!(FieldValue::from(3usize).type_name(), "int");
    }
}
