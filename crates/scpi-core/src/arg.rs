//! Field descriptors for SCPI records.
//!
//! An [`ArgStruct`] declares how one value of a record is coerced to and from
//! the comma separated wire representation. Records declare their fields as
//! an explicit, ordered `&'static [ArgStruct]` table; the table order is the
//! wire order.
//!
//! ```
//! use scpi_core::arg::ArgStruct;
//!
//! const FIELDS: &[ArgStruct] = &[
//!     ArgStruct::scalar_float("Rms"),
//!     ArgStruct::bool_list("Rms_Enabled", 3),
//!     ArgStruct::scalar_bool("P_99_Enabled").optional(),
//! ];
//! assert_eq!(FIELDS[1].width(), 3);
//! ```

use crate::conversions;
use crate::error::{ScpiError, ScpiResult};
use serde::{Deserialize, Serialize};

/// Wire type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Decimal number; malformed text decodes as "unavailable".
    Float,
    /// Decimal number or a reserved sentinel token such as `INV`.
    FloatExt,
    /// Integer.
    Int,
    /// `1`/`0`/`ON`/`OFF`.
    Boolean,
    /// Fixed number of consecutive boolean tokens.
    BooleanList(usize),
    /// Quoted or bare string.
    RawString,
    /// One of a fixed set of mnemonics.
    Enum(&'static [&'static str]),
}

impl FieldType {
    fn describe(&self) -> String {
        match self {
            FieldType::Float => "float".to_string(),
            FieldType::FloatExt => "float or sentinel".to_string(),
            FieldType::Int => "integer".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::BooleanList(n) => format!("list of {} booleans", n),
            FieldType::RawString => "string".to_string(),
            FieldType::Enum(choices) => format!("one of {}", choices.join("|")),
        }
    }
}

/// Reserved textual values an instrument reports instead of a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentinel {
    /// `INV`: result invalid.
    Invalid,
    /// `NAV`: result not available.
    NotAvailable,
    /// `NCAP`: not capable / not measurable in this configuration.
    NotCapable,
    /// `NAN`: not a number.
    NotANumber,
    /// `DTX`: discontinuous transmission, nothing to measure.
    Dtx,
    /// `OFL`: overflow.
    Overflow,
    /// `UFL`: underflow.
    Underflow,
}

impl Sentinel {
    const ALL: [Sentinel; 7] = [
        Sentinel::Invalid,
        Sentinel::NotAvailable,
        Sentinel::NotCapable,
        Sentinel::NotANumber,
        Sentinel::Dtx,
        Sentinel::Overflow,
        Sentinel::Underflow,
    ];

    /// The wire token for this sentinel.
    pub fn token(&self) -> &'static str {
        match self {
            Sentinel::Invalid => "INV",
            Sentinel::NotAvailable => "NAV",
            Sentinel::NotCapable => "NCAP",
            Sentinel::NotANumber => "NAN",
            Sentinel::Dtx => "DTX",
            Sentinel::Overflow => "OFL",
            Sentinel::Underflow => "UFL",
        }
    }

    /// Recognise a sentinel token (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        let t = token.trim();
        Self::ALL
            .into_iter()
            .find(|s| t.eq_ignore_ascii_case(s.token()))
    }
}

impl std::fmt::Display for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// A float that may instead carry an "instrument reports invalid" marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FloatExt {
    /// A measured or configured number.
    Numeric(f64),
    /// The instrument reported a sentinel instead of a number.
    Invalid(Sentinel),
}

impl FloatExt {
    /// The numeric value, or `None` for a sentinel.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            FloatExt::Numeric(v) => Some(*v),
            FloatExt::Invalid(_) => None,
        }
    }

    /// True when the value is a sentinel.
    pub fn is_invalid(&self) -> bool {
        matches!(self, FloatExt::Invalid(_))
    }
}

impl From<f64> for FloatExt {
    fn from(value: f64) -> Self {
        FloatExt::Numeric(value)
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// `Float` field value.
    Float(f64),
    /// `FloatExt` field value.
    FloatExt(FloatExt),
    /// `Int` field value.
    Int(i64),
    /// `Boolean` field value.
    Bool(bool),
    /// `BooleanList` field value.
    BoolList(Vec<bool>),
    /// `RawString` field value, without quotes.
    Str(String),
    /// `Enum` field value; the declared mnemonic once stored in a record.
    Enum(String),
}

/// Descriptor of one field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgStruct {
    /// Field name, unique within its table.
    pub name: &'static str,
    /// Wire type.
    pub field_type: FieldType,
    /// May be missing from the tail of a payload.
    pub optional: bool,
}

impl ArgStruct {
    /// Mandatory field of the given type.
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            optional: false,
        }
    }

    /// Mandatory [`FieldType::Float`] field.
    pub const fn scalar_float(name: &'static str) -> Self {
        Self::new(name, FieldType::Float)
    }

    /// Mandatory [`FieldType::FloatExt`] field.
    pub const fn scalar_float_ext(name: &'static str) -> Self {
        Self::new(name, FieldType::FloatExt)
    }

    /// Mandatory [`FieldType::Int`] field.
    pub const fn scalar_int(name: &'static str) -> Self {
        Self::new(name, FieldType::Int)
    }

    /// Mandatory [`FieldType::Boolean`] field.
    pub const fn scalar_bool(name: &'static str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Mandatory field of `len` booleans.
    pub const fn bool_list(name: &'static str, len: usize) -> Self {
        Self::new(name, FieldType::BooleanList(len))
    }

    /// Mandatory [`FieldType::RawString`] field.
    pub const fn raw_string(name: &'static str) -> Self {
        Self::new(name, FieldType::RawString)
    }

    /// Mandatory field restricted to `mnemonics`.
    pub const fn scalar_enum(name: &'static str, mnemonics: &'static [&'static str]) -> Self {
        Self::new(name, FieldType::Enum(mnemonics))
    }

    /// Mark the field as allowed to be absent from the tail of a payload.
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Number of wire tokens this field consumes.
    pub const fn width(&self) -> usize {
        match self.field_type {
            FieldType::BooleanList(n) => n,
            _ => 1,
        }
    }

    /// Decode this field from exactly [`width`](Self::width) tokens.
    ///
    /// `Ok(None)` means the instrument did not report a usable value; only
    /// booleans and enums treat malformed text as an error.
    pub fn decode(&self, tokens: &[String]) -> ScpiResult<Option<Value>> {
        if tokens.len() != self.width() {
            return Err(ScpiError::FieldArityMismatch {
                record: self.name.to_string(),
                min: self.width(),
                max: self.width(),
                actual: tokens.len(),
            });
        }

        let value = match self.field_type {
            FieldType::Float => conversions::parse_float(&tokens[0]).map(Value::Float),
            FieldType::FloatExt => decode_float_ext(&tokens[0]).map(Value::FloatExt),
            FieldType::Int => conversions::parse_int(&tokens[0]).map(Value::Int),
            FieldType::Boolean => Some(Value::Bool(self.decode_bool(&tokens[0])?)),
            FieldType::BooleanList(_) => Some(Value::BoolList(
                tokens
                    .iter()
                    .map(|t| self.decode_bool(t))
                    .collect::<ScpiResult<Vec<_>>>()?,
            )),
            FieldType::RawString => Some(Value::Str(conversions::unquote(&tokens[0]))),
            FieldType::Enum(choices) => {
                let token = conversions::unquote(&tokens[0]);
                let choice = choices
                    .iter()
                    .find(|m| conversions::matches_mnemonic(&token, m))
                    .ok_or_else(|| ScpiError::InvalidToken {
                        field: self.name.to_string(),
                        token: tokens[0].clone(),
                        expected: "enum mnemonic",
                    })?;
                Some(Value::Enum((*choice).to_string()))
            }
        };
        Ok(value)
    }

    /// Encode a value into its wire tokens.
    pub fn encode(&self, value: &Value) -> ScpiResult<Vec<String>> {
        let tokens = match (self.field_type, value) {
            (FieldType::Float, Value::Float(v)) if !v.is_nan() => {
                vec![conversions::format_float(*v)]
            }
            (FieldType::FloatExt, Value::FloatExt(FloatExt::Numeric(v)))
            | (FieldType::FloatExt, Value::Float(v)) => vec![conversions::format_float(*v)],
            (FieldType::FloatExt, Value::FloatExt(FloatExt::Invalid(s))) => {
                vec![s.token().to_string()]
            }
            (FieldType::Int, Value::Int(v)) => vec![v.to_string()],
            (FieldType::Boolean, Value::Bool(b)) => vec![conversions::format_bool(*b).to_string()],
            (FieldType::BooleanList(n), Value::BoolList(list)) if list.len() == n => list
                .iter()
                .map(|b| conversions::format_bool(*b).to_string())
                .collect(),
            (FieldType::RawString, Value::Str(s)) => vec![conversions::quote_string(s)],
            (FieldType::Enum(choices), Value::Enum(e)) => {
                let choice = choices
                    .iter()
                    .find(|m| conversions::matches_mnemonic(e, m))
                    .ok_or_else(|| self.type_mismatch())?;
                vec![(*choice).to_string()]
            }
            _ => return Err(self.type_mismatch()),
        };
        Ok(tokens)
    }

    /// Check that a value is acceptable for this field without encoding it.
    pub fn check(&self, value: &Value) -> ScpiResult<()> {
        self.encode(value).map(|_| ())
    }

    /// Validate a value and rewrite it into the form [`decode`](Self::decode)
    /// would produce for its wire tokens.
    ///
    /// Enum values become the declared mnemonic. In a `FloatExt` field a
    /// plain float becomes `Numeric`, and `NaN` becomes the `NAN` sentinel.
    pub fn canonicalize(&self, value: Value) -> ScpiResult<Value> {
        self.check(&value)?;
        let value = match (self.field_type, value) {
            (FieldType::FloatExt, Value::Float(v)) => Value::FloatExt(FloatExt::Numeric(v)),
            (FieldType::Enum(choices), Value::Enum(e)) => choices
                .iter()
                .find(|m| conversions::matches_mnemonic(&e, m))
                .map(|m| Value::Enum((*m).to_string()))
                .ok_or_else(|| self.type_mismatch())?,
            (_, other) => other,
        };
        Ok(match value {
            Value::FloatExt(FloatExt::Numeric(v)) if v.is_nan() => {
                Value::FloatExt(FloatExt::Invalid(Sentinel::NotANumber))
            }
            other => other,
        })
    }

    fn decode_bool(&self, token: &str) -> ScpiResult<bool> {
        conversions::parse_bool(token).ok_or_else(|| ScpiError::InvalidToken {
            field: self.name.to_string(),
            token: token.to_string(),
            expected: "boolean (1/0/ON/OFF)",
        })
    }

    fn type_mismatch(&self) -> ScpiError {
        ScpiError::FieldTypeMismatch {
            field: self.name.to_string(),
            expected: self.field_type.describe(),
        }
    }
}

fn decode_float_ext(token: &str) -> Option<FloatExt> {
    if let Some(sentinel) = Sentinel::from_token(token) {
        return Some(FloatExt::Invalid(sentinel));
    }
    conversions::parse_float(token).map(FloatExt::Numeric)
}
