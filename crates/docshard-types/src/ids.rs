//! Validated identifiers for the tenant / collection / table hierarchy.
//!
//! Identifiers end up inside generated index names and SQL predicates, so
//! they are restricted to `[A-Za-z0-9_.-]`, must start with an alphanumeric
//! character and are at most [`MAX_IDENT_LEN`] bytes long.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, SchemaError, MAX_IDENT_LEN};

fn validate(kind: &'static str, value: &str) -> Result<()> {
    let starts_ok = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric());
    let chars_ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !starts_ok || !chars_ok || value.len() > MAX_IDENT_LEN {
        return Err(SchemaError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an identifier.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = SchemaError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = SchemaError;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// An isolated customer scope.
    TenantId,
    "tenant"
);
identifier!(
    /// A logical document group owned by a tenant.
    CollectionName,
    "collection"
);
identifier!(
    /// A named table inside a collection.
    TableName,
    "table"
);

/// Cache and cursor key for sequence allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceKey {
    pub tenant: TenantId,
    pub collection: CollectionName,
    pub table: TableName,
}

impl SequenceKey {
    pub fn new(tenant: TenantId, collection: CollectionName, table: TableName) -> Self {
        Self {
            tenant,
            collection,
            table,
        }
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.collection, self.table)
    }
}
