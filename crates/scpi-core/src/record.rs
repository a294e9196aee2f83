//! Record encode/decode engine.
//!
//! A [`StructRecord`] maps an ordered field table to a single comma separated
//! SCPI payload and back. Typed records implement [`ScpiRecord`] on top of it
//! by converting to and from the generic value list.
//!
//! # Arity
//!
//! A response must carry every token of every non-optional field. Optional
//! fields may be missing from the tail as whole fields; a list field that is
//! only partially present is an arity error. Nothing is returned when the
//! count does not fit.
//!
//! # Encoding
//!
//! Trailing unset optional fields are dropped. Omission is positional: an
//! unset field followed by a set one, or an unset mandatory field, is an
//! [`ScpiError::UnsetField`].

use crate::arg::{ArgStruct, FloatExt, Value};
use crate::conversions::split_tokens;
use crate::error::{ScpiError, ScpiResult};
use tracing::trace;

/// Generic record: a field table plus one optional value per field.
#[derive(Debug, Clone, PartialEq)]
pub struct StructRecord {
    name: &'static str,
    fields: &'static [ArgStruct],
    values: Vec<Option<Value>>,
}

impl StructRecord {
    /// Create an empty record, every field unset.
    pub fn new(name: &'static str, fields: &'static [ArgStruct]) -> Self {
        Self {
            name,
            fields,
            values: vec![None; fields.len()],
        }
    }

    /// Decode a raw response into a fully populated record.
    pub fn parse(
        name: &'static str,
        fields: &'static [ArgStruct],
        raw: &str,
    ) -> ScpiResult<Self> {
        let tokens = split_tokens(raw);
        let count = Self::accepted_field_count(name, fields, tokens.len())?;

        let mut record = Self::new(name, fields);
        let mut offset = 0;
        for (idx, field) in fields.iter().take(count).enumerate() {
            let width = field.width();
            record.values[idx] = field.decode(&tokens[offset..offset + width])?;
            offset += width;
        }

        trace!(record = name, tokens = tokens.len(), "decoded record");
        Ok(record)
    }

    /// Number of leading fields covered by `actual` tokens.
    fn accepted_field_count(
        name: &str,
        fields: &[ArgStruct],
        actual: usize,
    ) -> ScpiResult<usize> {
        let max: usize = fields.iter().map(ArgStruct::width).sum();
        let mandatory = fields
            .iter()
            .rposition(|f| !f.optional)
            .map_or(0, |idx| idx + 1);
        let min: usize = fields[..mandatory].iter().map(ArgStruct::width).sum();

        let mismatch = || ScpiError::FieldArityMismatch {
            record: name.to_string(),
            min,
            max,
            actual,
        };

        if actual < min || actual > max {
            return Err(mismatch());
        }

        let mut covered = 0;
        for (idx, field) in fields.iter().enumerate() {
            if covered == actual && idx >= mandatory {
                return Ok(idx);
            }
            covered += field.width();
        }
        if covered == actual {
            Ok(fields.len())
        } else {
            Err(mismatch())
        }
    }

    /// Encode the record as a comma separated argument list.
    pub fn to_scpi_string(&self) -> ScpiResult<String> {
        let last_set = self.values.iter().rposition(Option::is_some);
        let mut tokens = Vec::new();

        for (idx, (field, value)) in self.fields.iter().zip(&self.values).enumerate() {
            match value {
                Some(v) => tokens.extend(field.encode(v)?),
                None => {
                    let trailing = last_set.map_or(true, |last| idx > last);
                    if !(trailing && field.optional) {
                        return Err(ScpiError::UnsetField {
                            record: self.name.to_string(),
                            field: field.name.to_string(),
                        });
                    }
                }
            }
        }
        Ok(tokens.join(","))
    }

    /// Record name used in error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Field table in wire order.
    pub fn fields(&self) -> &'static [ArgStruct] {
        self.fields
    }

    /// Values in wire order, `None` where unset or unavailable.
    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    /// Iterate `(field name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&Value>)> + '_ {
        self.fields
            .iter()
            .zip(&self.values)
            .map(|(f, v)| (f.name, v.as_ref()))
    }

    fn index_of(&self, field: &str) -> ScpiResult<usize> {
        self.fields
            .iter()
            .position(|f| f.name == field)
            .ok_or_else(|| ScpiError::UnknownField {
                record: self.name.to_string(),
                field: field.to_string(),
            })
    }

    /// Raw value of a field, `None` when unset or unavailable.
    pub fn get(&self, field: &str) -> ScpiResult<Option<&Value>> {
        let idx = self.index_of(field)?;
        Ok(self.values[idx].as_ref())
    }

    /// Set a field, checking the value against the field type.
    ///
    /// The stored value is canonical (see [`ArgStruct::canonicalize`]), so a
    /// record reads back what decoding its own encoding would give.
    pub fn set(&mut self, field: &str, value: Option<Value>) -> ScpiResult<()> {
        let idx = self.index_of(field)?;
        self.values[idx] = value
            .map(|v| self.fields[idx].canonicalize(v))
            .transpose()?;
        Ok(())
    }

    /// Builder form of [`set`](Self::set) for always-present values.
    pub fn with(mut self, field: &str, value: Value) -> ScpiResult<Self> {
        self.set(field, Some(value))?;
        Ok(self)
    }

    fn mismatch(&self, field: &str, expected: &str) -> ScpiError {
        ScpiError::FieldTypeMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Value of a `Float` field.
    pub fn float(&self, field: &str) -> ScpiResult<Option<f64>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::Float(v)) => Ok(Some(*v)),
            Some(_) => Err(self.mismatch(field, "float")),
        }
    }

    /// Value of a `FloatExt` field.
    pub fn float_ext(&self, field: &str) -> ScpiResult<Option<FloatExt>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::FloatExt(v)) => Ok(Some(*v)),
            Some(Value::Float(v)) => Ok(Some(FloatExt::Numeric(*v))),
            Some(_) => Err(self.mismatch(field, "float or sentinel")),
        }
    }

    /// Value of an `Int` field.
    pub fn int(&self, field: &str) -> ScpiResult<Option<i64>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(_) => Err(self.mismatch(field, "integer")),
        }
    }

    /// Value of a `Boolean` field.
    pub fn bool(&self, field: &str) -> ScpiResult<Option<bool>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::Bool(v)) => Ok(Some(*v)),
            Some(_) => Err(self.mismatch(field, "boolean")),
        }
    }

    /// Value of a `BooleanList` field.
    pub fn bool_list(&self, field: &str) -> ScpiResult<Option<Vec<bool>>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::BoolList(v)) => Ok(Some(v.clone())),
            Some(_) => Err(self.mismatch(field, "boolean list")),
        }
    }

    /// Value of a `RawString` field, unquoted.
    pub fn string(&self, field: &str) -> ScpiResult<Option<String>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(self.mismatch(field, "string")),
        }
    }

    /// Declared mnemonic of an `Enum` field.
    pub fn enum_value(&self, field: &str) -> ScpiResult<Option<String>> {
        match self.get(field)? {
            None => Ok(None),
            Some(Value::Enum(v)) => Ok(Some(v.clone())),
            Some(_) => Err(self.mismatch(field, "enum")),
        }
    }

    /// Like the typed getters, but an unset field is an error.
    pub fn required<T>(&self, field: &str, value: ScpiResult<Option<T>>) -> ScpiResult<T> {
        value?.ok_or_else(|| ScpiError::UnsetField {
            record: self.name.to_string(),
            field: field.to_string(),
        })
    }
}

/// A strongly typed record with an explicit field table.
///
/// Implementors convert between their own fields and a [`StructRecord`];
/// `decode` and `encode` then come for free.
pub trait ScpiRecord: Sized {
    /// Record name used in error messages.
    const NAME: &'static str;
    /// Field table in wire order.
    const FIELDS: &'static [ArgStruct];

    /// Build the typed value from a decoded generic record.
    fn from_record(record: &StructRecord) -> ScpiResult<Self>;

    /// Convert into a generic record ready for encoding.
    fn to_record(&self) -> ScpiResult<StructRecord>;

    /// Fresh, empty generic record for this type.
    fn empty_record() -> StructRecord {
        StructRecord::new(Self::NAME, Self::FIELDS)
    }

    /// Decode a raw response.
    fn decode(raw: &str) -> ScpiResult<Self> {
        let record = StructRecord::parse(Self::NAME, Self::FIELDS, raw)?;
        Self::from_record(&record)
    }

    /// Encode as a comma separated argument list.
    fn encode(&self) -> ScpiResult<String> {
        self.to_record()?.to_scpi_string()
    }
}
