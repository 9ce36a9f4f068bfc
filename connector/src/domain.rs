/// A constant handed down by the engine inside a predicate domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Varchar(String),
    /// days since 1970-01-01
    Date(i32),
    /// microseconds since epoch
    Timestamp(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Unbounded,
    Inclusive(Literal),
    Exclusive(Literal),
}

/// One contiguous value range of a column domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub low: Bound,
    pub high: Bound,
}

impl Range {
    pub fn equal(value: Literal) -> Self {
        Self {
            low: Bound::Inclusive(value.clone()),
            high: Bound::Inclusive(value),
        }
    }

    pub fn greater_than(value: Literal) -> Self {
        Self {
            low: Bound::Exclusive(value),
            high: Bound::Unbounded,
        }
    }

    pub fn less_than(value: Literal) -> Self {
        Self {
            low: Bound::Unbounded,
            high: Bound::Exclusive(value),
        }
    }

    pub fn between(low: Literal, high: Literal) -> Self {
        Self {
            low: Bound::Inclusive(low),
            high: Bound::Inclusive(high),
        }
    }

    /// The single value this range admits, when both bounds are the same
    /// inclusive literal.
    pub fn single_value(&self) -> Option<&Literal> {
        match (&self.low, &self.high) {
            (Bound::Inclusive(low), Bound::Inclusive(high)) if low == high => Some(low),
            _ => None,
        }
    }
}

/// The set of values a column may take under the engine's predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub ranges: Vec<Range>,
    pub null_allowed: bool,
}

impl Domain {
    pub fn single(value: Literal) -> Self {
        Self {
            ranges: vec![Range::equal(value)],
            null_allowed: false,
        }
    }

    pub fn of_values(values: Vec<Literal>) -> Self {
        Self {
            ranges: values.into_iter().map(Range::equal).collect(),
            null_allowed: false,
        }
    }

    pub fn of_range(range: Range) -> Self {
        Self {
            ranges: vec![range],
            null_allowed: false,
        }
    }

    pub fn with_nulls(mut self) -> Self {
        self.null_allowed = true;
        self
    }
}

/// An engine predicate: per-column domains, implicitly AND-combined.
/// Column order is preserved so rendered SQL is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraint {
    pub domains: Vec<(String, Domain)>,
}

impl Constraint {
    pub fn new(domains: Vec<(String, Domain)>) -> Self {
        Self { domains }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
