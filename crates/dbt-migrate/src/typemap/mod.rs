//! Type-family classification for source column types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compatibility family of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    Boolean,
    Integer,
    Decimal,
    Float,
    Character,
    Binary,
    Temporal,
    Identifier,
    Structured,
}

impl TypeFamily {
    /// Portable type name used when rendering casts in generated models.
    pub fn portable_type(&self) -> &'static str {
        match self {
            TypeFamily::Boolean => "boolean",
            TypeFamily::Integer => "bigint",
            TypeFamily::Decimal => "numeric",
            TypeFamily::Float => "double precision",
            TypeFamily::Character => "text",
            TypeFamily::Binary => "bytea",
            TypeFamily::Temporal => "timestamp",
            TypeFamily::Identifier => "uuid",
            TypeFamily::Structured => "json",
        }
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeFamily::Boolean => "boolean",
            TypeFamily::Integer => "integer",
            TypeFamily::Decimal => "decimal",
            TypeFamily::Float => "float",
            TypeFamily::Character => "character",
            TypeFamily::Binary => "binary",
            TypeFamily::Temporal => "temporal",
            TypeFamily::Identifier => "identifier",
            TypeFamily::Structured => "structured",
        };
        f.write_str(name)
    }
}

/// Strip length/precision suffixes and modifiers: `NVARCHAR(255)` -> `nvarchar`,
/// `timestamp with time zone` -> `timestamp with time zone`, `int unsigned` -> `int`.
fn base_type(declared: &str) -> String {
    let lower = declared.trim().to_lowercase();
    let without_args = match lower.find('(') {
        Some(idx) => {
            let tail = lower[idx..].find(')').map(|end| &lower[idx + end + 1..]).unwrap_or("");
            format!("{}{}", &lower[..idx], tail)
        }
        None => lower,
    };
    let collapsed = without_args.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(" unsigned")
        .trim_end_matches(" identity")
        .to_string()
}

/// Classify a declared source type. Returns `None` for types with no table entry.
pub fn classify(declared: &str) -> Option<TypeFamily> {
    let family = match base_type(declared).as_str() {
        // Boolean
        "bit" | "bool" | "boolean" => TypeFamily::Boolean,

        // Integer types
        "tinyint" | "smallint" | "int" | "integer" | "bigint" | "mediumint" | "int2" | "int4"
        | "int8" | "serial" | "bigserial" | "smallserial" => TypeFamily::Integer,

        // Decimal/numeric
        "decimal" | "numeric" | "money" | "smallmoney" | "number" => TypeFamily::Decimal,

        // Floating point
        "float" | "real" | "double" | "double precision" | "float4" | "float8" => {
            TypeFamily::Float
        }

        // String types
        "char" | "nchar" | "varchar" | "nvarchar" | "text" | "ntext" | "character"
        | "character varying" | "varchar2" | "nvarchar2" | "clob" | "tinytext"
        | "mediumtext" | "longtext" | "string" | "citext" | "enum" => TypeFamily::Character,

        // Binary types
        "binary" | "varbinary" | "image" | "bytea" | "blob" | "tinyblob" | "mediumblob"
        | "longblob" | "rowversion" => TypeFamily::Binary,

        // Date/time types
        "date" | "time" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset"
        | "timestamp" | "timestamptz" | "timestamp with time zone"
        | "timestamp without time zone" | "time with time zone" | "interval" | "year" => {
            TypeFamily::Temporal
        }

        // GUID
        "uniqueidentifier" | "uuid" => TypeFamily::Identifier,

        // Semi-structured
        "xml" | "json" | "jsonb" | "variant" => TypeFamily::Structured,

        _ => return None,
    };
    Some(family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types() {
        assert_eq!(classify("int"), Some(TypeFamily::Integer));
        assert_eq!(classify("BIGINT"), Some(TypeFamily::Integer));
        assert_eq!(classify("tinyint"), Some(TypeFamily::Integer));
        assert_eq!(classify("int unsigned"), Some(TypeFamily::Integer));
    }

    #[test]
    fn test_string_types() {
        assert_eq!(classify("varchar(100)"), Some(TypeFamily::Character));
        assert_eq!(classify("NVARCHAR(MAX)"), Some(TypeFamily::Character));
        assert_eq!(classify("character varying(255)"), Some(TypeFamily::Character));
        assert_eq!(classify("text"), Some(TypeFamily::Character));
    }

    #[test]
    fn test_decimal_types() {
        assert_eq!(classify("decimal(18,2)"), Some(TypeFamily::Decimal));
        assert_eq!(classify("money"), Some(TypeFamily::Decimal));
        assert_eq!(classify("float"), Some(TypeFamily::Float));
    }

    #[test]
    fn test_datetime_types() {
        assert_eq!(classify("datetime2(7)"), Some(TypeFamily::Temporal));
        assert_eq!(classify("datetimeoffset"), Some(TypeFamily::Temporal));
        assert_eq!(
            classify("timestamp(3) with time zone"),
            Some(TypeFamily::Temporal)
        );
        assert_eq!(classify("date"), Some(TypeFamily::Temporal));
    }

    #[test]
    fn test_special_types() {
        assert_eq!(classify("uniqueidentifier"), Some(TypeFamily::Identifier));
        assert_eq!(classify("bit"), Some(TypeFamily::Boolean));
        assert_eq!(classify("varbinary(max)"), Some(TypeFamily::Binary));
        assert_eq!(classify("xml"), Some(TypeFamily::Structured));
    }

    #[test]
    fn test_unknown_types() {
        assert_eq!(classify("geography"), None);
        assert_eq!(classify("hierarchyid"), None);
        assert_eq!(classify(""), None);
    }
}
