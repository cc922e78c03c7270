//! Native column type → compact type code tables.
//!
//! Each backend has one static table. Codes are one or two letters:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `S`  | string |
//! | `I`  | integer |
//! | `F`  | float |
//! | `N`  | numeric / decimal |
//! | `B`  | boolean |
//! | `D`  | date |
//! | `DT` | datetime |
//! | `TS` | timestamp |
//! | `T`  | time |
//! | `BY` | bytes |
//! | `J`  | json |
//! | `U`  | uuid |
//! | `A`  | array |
//! | `ST` | struct |
//! | `G`  | geography |
//!
//! Any native type missing from a table falls back to [`STRING_CODE`].

use crate::config::ProviderKind;

/// Code assigned to any native type the backend's table does not know.
pub const STRING_CODE: &str = "S";

/// How a backend spells its native type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCase {
    Upper,
    Lower,
}

/// Immutable native → code mapping for one backend.
#[derive(Debug)]
pub struct TypeMap {
    kind: ProviderKind,
    case: TypeCase,
    entries: &'static [(&'static str, &'static str)],
}

impl TypeMap {
    /// Backend this table belongs to.
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Exact lookup after case and parameter normalization.
    pub fn get(&self, native: &str) -> Option<&'static str> {
        let key = self.normalize(native);
        self.entries
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, code)| *code)
    }

    /// Lookup with the string fallback. Never fails.
    pub fn code_for(&self, native: &str) -> &'static str {
        self.get(native).unwrap_or(STRING_CODE)
    }

    /// Whether `native` is present in the table.
    pub fn contains(&self, native: &str) -> bool {
        self.get(native).is_some()
    }

    /// All `(native, code)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `code=NATIVE` pairs, one per distinct code, for prompt headers.
    ///
    /// The first native name declared for a code is used.
    pub fn legend(&self) -> String {
        let mut seen: Vec<&str> = Vec::new();
        let mut parts = Vec::new();
        for (native, code) in self.entries {
            if seen.contains(code) {
                continue;
            }
            seen.push(*code);
            parts.push(format!("{}={}", code, native.to_uppercase()));
        }
        parts.join(", ")
    }

    /// Apply the backend's case convention and drop a parameter list,
    /// so `varchar(255)` and `DECIMAL(10, 2)` hit their base entries.
    fn normalize(&self, native: &str) -> String {
        let base = match native.find('(') {
            Some(idx) => {
                let (head, rest) = native.split_at(idx);
                // keep anything after the closing paren, e.g. `timestamp(6) with time zone`
                let tail = rest.find(')').map(|end| &rest[end + 1..]).unwrap_or("");
                format!("{}{}", head.trim_end(), tail)
            }
            None => native.to_string(),
        };
        let base = base.trim();
        match self.case {
            TypeCase::Upper => base.to_uppercase(),
            TypeCase::Lower => base.to_lowercase(),
        }
    }
}

/// Look up the table for a backend.
pub fn type_map_for(kind: ProviderKind) -> &'static TypeMap {
    match kind {
        ProviderKind::BigQuery => &BIGQUERY_TYPES,
        ProviderKind::Sqlite => &SQLITE_TYPES,
        ProviderKind::Postgres => &POSTGRES_TYPES,
        ProviderKind::Mysql => &MYSQL_TYPES,
    }
}

pub static BIGQUERY_TYPES: TypeMap = TypeMap {
    kind: ProviderKind::BigQuery,
    case: TypeCase::Upper,
    entries: &[
        ("STRING", "S"),
        ("FLOAT", "F"),
        ("FLOAT64", "F"),
        ("DATE", "D"),
        ("INTEGER", "I"),
        ("INT64", "I"),
        ("TIMESTAMP", "TS"),
        ("DATETIME", "DT"),
        ("TIME", "T"),
        ("BOOLEAN", "B"),
        ("BOOL", "B"),
        ("NUMERIC", "N"),
        ("BIGNUMERIC", "N"),
        ("ARRAY", "A"),
        ("STRUCT", "ST"),
        ("RECORD", "ST"),
        ("BYTES", "BY"),
        ("GEOGRAPHY", "G"),
        ("JSON", "J"),
    ],
};

pub static SQLITE_TYPES: TypeMap = TypeMap {
    kind: ProviderKind::Sqlite,
    case: TypeCase::Upper,
    entries: &[
        ("TEXT", "S"),
        ("INTEGER", "I"),
        ("REAL", "F"),
        ("NUMERIC", "N"),
        ("BLOB", "BY"),
        ("BOOLEAN", "B"),
        ("DATE", "D"),
        ("DATETIME", "DT"),
        ("TIMESTAMP", "TS"),
        ("VARCHAR", "S"),
        ("CHAR", "S"),
        ("INT", "I"),
        ("FLOAT", "F"),
        ("DOUBLE", "F"),
        ("DECIMAL", "N"),
    ],
};

pub static POSTGRES_TYPES: TypeMap = TypeMap {
    kind: ProviderKind::Postgres,
    case: TypeCase::Lower,
    entries: &[
        ("character varying", "S"),
        ("varchar", "S"),
        ("character", "S"),
        ("char", "S"),
        ("text", "S"),
        ("integer", "I"),
        ("smallint", "I"),
        ("bigint", "I"),
        ("decimal", "N"),
        ("numeric", "N"),
        ("real", "F"),
        ("double precision", "F"),
        ("float", "F"),
        ("boolean", "B"),
        ("date", "D"),
        ("timestamp", "DT"),
        ("timestamp with time zone", "TS"),
        ("timestamp without time zone", "DT"),
        ("time", "T"),
        ("bytea", "BY"),
        ("json", "J"),
        ("jsonb", "J"),
        ("uuid", "U"),
        ("array", "A"),
    ],
};

pub static MYSQL_TYPES: TypeMap = TypeMap {
    kind: ProviderKind::Mysql,
    case: TypeCase::Lower,
    entries: &[
        ("varchar", "S"),
        ("char", "S"),
        ("text", "S"),
        ("tinytext", "S"),
        ("mediumtext", "S"),
        ("longtext", "S"),
        ("int", "I"),
        ("tinyint", "I"),
        ("smallint", "I"),
        ("mediumint", "I"),
        ("bigint", "I"),
        ("decimal", "N"),
        ("numeric", "N"),
        ("float", "F"),
        ("double", "F"),
        ("boolean", "B"),
        ("bool", "B"),
        ("date", "D"),
        ("datetime", "DT"),
        ("timestamp", "TS"),
        ("time", "T"),
        ("binary", "BY"),
        ("varbinary", "BY"),
        ("blob", "BY"),
        ("tinyblob", "BY"),
        ("mediumblob", "BY"),
        ("longblob", "BY"),
        ("json", "J"),
        ("enum", "S"),
        ("set", "A"),
    ],
};
