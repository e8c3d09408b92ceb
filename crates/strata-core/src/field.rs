//! Field types and per-field descriptors.

use crate::value::Value;

/// The semantic type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Scalar primary key column.
    Primary,
    /// Boolean, stored as 0/1.
    Boolean,
    /// Signed integer.
    Integer,
    /// Unsigned integer.
    Unsigned,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Fixed-point decimal.
    Decimal,
    /// Fixed-length character string.
    Char,
    /// Variable-length string.
    String,
    /// Unbounded text.
    Text,
    /// List of strings, stored comma-joined in a text column.
    List,
    /// JSON document, stored serialized in a text column.
    Json,
    /// Calendar date.
    Date,
    /// Wall-clock time.
    Time,
    /// Date and time.
    Timestamp,
}

impl FieldType {
    /// Whether the storage representation is a character column.
    #[must_use]
    pub const fn is_string_like(self) -> bool {
        matches!(
            self,
            Self::Char | Self::String | Self::Text | Self::List | Self::Json
        )
    }

    /// Whether the field carries calendar/clock semantics.
    #[must_use]
    pub const fn is_date_like(self) -> bool {
        matches!(self, Self::Date | Self::Time | Self::Timestamp)
    }

    /// Whether the field is numeric.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Primary
                | Self::Integer
                | Self::Unsigned
                | Self::Float
                | Self::Double
                | Self::Decimal
        )
    }
}

/// A declared field: type plus optional descriptors.
#[derive(Debug, Clone)]
pub struct Field {
    /// Semantic type.
    pub ty: FieldType,
    /// Character length for `Char`/`String`.
    pub length: Option<u32>,
    /// Total digits for `Decimal`.
    pub precision: Option<u32>,
    /// Fractional digits for `Decimal`.
    pub scale: Option<u32>,
    /// Whether NULL is permitted.
    pub nullable: bool,
    /// Initial value applied by `Model::create` and used as the JSON
    /// fallback on load.
    pub initial: Option<Value>,
    /// Older column names this field may still carry in a live table.
    /// The synchronizer renames such a column instead of recreating it.
    pub legacy: Vec<String>,
    /// Deprecated fields are kept out of generated DDL.
    pub deprecated: bool,
}

impl Field {
    /// Creates a field of the given type with defaults: nullable, no
    /// length/precision, no initial value.
    #[must_use]
    pub fn new(ty: FieldType) -> Self {
        Self {
            ty,
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            initial: None,
            legacy: Vec::new(),
            deprecated: false,
        }
    }

    /// Sets the character length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets decimal precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Marks the field NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the initial value.
    #[must_use]
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    /// Declares legacy column names for rename-preserving migration.
    #[must_use]
    pub fn legacy<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy = names.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the field deprecated (excluded from DDL).
    #[must_use]
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}
