use crate::schema::LogicalType;

/// Values of one column, stored as a dense array of the column's native
/// representation. Null slots hold the type's zero value; the out-of-band
/// null flags live on the enclosing [`Column`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Varchar(Vec<String>),
    /// days since 1970-01-01
    Date(Vec<i32>),
    /// picoseconds since midnight
    TimePicos(Vec<i64>),
    /// microseconds since epoch
    TimestampMicros(Vec<i64>),
    /// unscaled short decimal mantissa
    DecimalShort(Vec<i64>),
    /// unscaled long decimal mantissa
    DecimalLong(Vec<i128>),
}

impl ColumnValues {
    pub fn with_capacity(logical_type: LogicalType, capacity: usize) -> Self {
        match logical_type {
            LogicalType::Integer => Self::Int32(Vec::with_capacity(capacity)),
            LogicalType::Bigint => Self::Int64(Vec::with_capacity(capacity)),
            LogicalType::Double => Self::Float64(Vec::with_capacity(capacity)),
            LogicalType::Varchar | LogicalType::Opaque => {
                Self::Varchar(Vec::with_capacity(capacity))
            }
            LogicalType::Date => Self::Date(Vec::with_capacity(capacity)),
            LogicalType::Time => Self::TimePicos(Vec::with_capacity(capacity)),
            LogicalType::Timestamp => Self::TimestampMicros(Vec::with_capacity(capacity)),
            LogicalType::DecimalShort => Self::DecimalShort(Vec::with_capacity(capacity)),
            LogicalType::DecimalLong => Self::DecimalLong(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Varchar(v) => v.len(),
            Self::Date(v) => v.len(),
            Self::TimePicos(v) => v.len(),
            Self::TimestampMicros(v) => v.len(),
            Self::DecimalShort(v) => v.len(),
            Self::DecimalLong(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_zero(&mut self) {
        match self {
            Self::Int32(v) => v.push(0),
            Self::Int64(v) => v.push(0),
            Self::Float64(v) => v.push(0.0),
            Self::Varchar(v) => v.push(String::new()),
            Self::Date(v) => v.push(0),
            Self::TimePicos(v) => v.push(0),
            Self::TimestampMicros(v) => v.push(0),
            Self::DecimalShort(v) => v.push(0),
            Self::DecimalLong(v) => v.push(0),
        }
    }

    fn byte_size(&self) -> usize {
        match self {
            Self::Int32(v) => v.len() * 4,
            Self::Int64(v) => v.len() * 8,
            Self::Float64(v) => v.len() * 8,
            Self::Varchar(v) => v.iter().map(|s| s.len() + std::mem::size_of::<String>()).sum(),
            Self::Date(v) => v.len() * 4,
            Self::TimePicos(v) => v.len() * 8,
            Self::TimestampMicros(v) => v.len() * 8,
            Self::DecimalShort(v) => v.len() * 8,
            Self::DecimalLong(v) => v.len() * 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub nulls: Vec<bool>,
    pub values: ColumnValues,
}

impl Column {
    pub fn with_capacity(logical_type: LogicalType, capacity: usize) -> Self {
        Self {
            nulls: Vec::with_capacity(capacity),
            values: ColumnValues::with_capacity(logical_type, capacity),
        }
    }

    pub fn push_null(&mut self) {
        self.nulls.push(true);
        self.values.push_zero();
    }

    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nulls.is_empty()
    }

    /// Approximate heap footprint of this column.
    pub fn byte_size(&self) -> usize {
        self.values.byte_size() + self.nulls.len()
    }
}

/// A columnar group of rows produced by a single connection.
///
/// Immutable once built; consumers share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub row_count: usize,
    pub columns: Vec<Column>,
}

impl Batch {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Approximate heap footprint, used for page accounting.
    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(Column::byte_size).sum()
    }
}
