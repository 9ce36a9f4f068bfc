use crate::codec::CodecError;
use serde::Deserialize;

/// Logical column types understood by the row decoder.
///
/// `Opaque` is the defensive fallback for type names this version does not
/// know: the payload is read with the varchar framing and rendered as hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Integer,
    Bigint,
    Double,
    Varchar,
    Date,
    Time,
    Timestamp,
    DecimalShort,
    DecimalLong,
    Opaque,
}

impl LogicalType {
    pub fn parse(name: &str) -> Self {
        match name {
            "INTEGER" => Self::Integer,
            "BIGINT" => Self::Bigint,
            "DOUBLE" => Self::Double,
            "VARCHAR" | "CHAR" => Self::Varchar,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" => Self::Timestamp,
            "DECIMAL_SHORT" => Self::DecimalShort,
            "DECIMAL_LONG" => Self::DecimalLong,
            other => {
                tracing::warn!("unknown column type {other}, falling back to hex rendering");
                Self::Opaque
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Bigint => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::DecimalShort => "DECIMAL_SHORT",
            Self::DecimalLong => "DECIMAL_LONG",
            Self::Opaque => "OPAQUE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    pub logical_type: LogicalType,
}

/// Ordered column list for one query. Every connection of the same query
/// sends an identical schema in its handshake.
#[derive(Debug, Clone, Default)]
pub struct ColumnSchema {
    pub columns: Vec<ColumnDesc>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[derive(Deserialize)]
struct SchemaJson {
    columns: Vec<ColumnJson>,
}

#[derive(Deserialize)]
struct ColumnJson {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

/// Parses the handshake schema JSON:
/// `{"columns":[{"name":"col_0","type":"INTEGER"}, ...]}`.
pub fn parse_schema_json(raw: &[u8]) -> Result<ColumnSchema, CodecError> {
    let parsed: SchemaJson = serde_json::from_slice(raw)
        .map_err(|e| CodecError::MalformedSchema(e.to_string()))?;
    Ok(ColumnSchema::new(
        parsed
            .columns
            .into_iter()
            .map(|c| ColumnDesc {
                logical_type: LogicalType::parse(&c.type_name),
                name: c.name,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_json() {
        let raw = br#"{"columns":[{"name":"id","type":"BIGINT"},{"name":"label","type":"VARCHAR"}]}"#;
        let schema = parse_schema_json(raw).unwrap();
        assert_eq!(schema.column_count(), 2);
        assert_eq!(schema.columns[0].name, "id");
        assert_eq!(schema.columns[0].logical_type, LogicalType::Bigint);
        assert_eq!(schema.columns[1].logical_type, LogicalType::Varchar);
    }

    #[test]
    fn test_unknown_type_falls_back_to_opaque() {
        let raw = br#"{"columns":[{"name":"x","type":"GEOMETRY"}]}"#;
        let schema = parse_schema_json(raw).unwrap();
        assert_eq!(schema.columns[0].logical_type, LogicalType::Opaque);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse_schema_json(b"{\"columns\": 7}"),
            Err(CodecError::MalformedSchema(_))
        ));
    }
}
