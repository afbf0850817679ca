//! Stream and column identifiers.
//!
//! A [`StreamId`] carries every name a stream is known by: the final table,
//! the raw landing table, and the namespace/name the user declared. A
//! [`ColumnId`] does the same for a single column. Both are produced by a
//! destination's [`SqlGenerator`](super::traits::SqlGenerator) and are
//! immutable afterwards.
//!
//! This module also holds identifier validation and quoting shared by the
//! SQL generators.

use serde::Serialize;

use crate::error::{Result, TypeDedupeError};

use super::stream::StreamDescriptor;

/// Default maximum identifier length used when a dialect doesn't specify one.
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 128;

/// Every name a stream is known by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamId {
    pub final_namespace: String,
    pub final_name: String,
    pub raw_namespace: String,
    pub raw_name: String,
    /// Namespace as declared in the catalog. Used to route records.
    pub original_namespace: String,
    /// Name as declared in the catalog. Used to route records.
    pub original_name: String,
}

impl StreamId {
    pub fn new(
        final_namespace: impl Into<String>,
        final_name: impl Into<String>,
        raw_namespace: impl Into<String>,
        raw_name: impl Into<String>,
        original_namespace: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            final_namespace: final_namespace.into(),
            final_name: final_name.into(),
            raw_namespace: raw_namespace.into(),
            raw_name: raw_name.into(),
            original_namespace: original_namespace.into(),
            original_name: original_name.into(),
        }
    }

    /// Fully qualified final table, e.g. `"public"."users_airbyte_tmp"`.
    pub fn final_table_id(&self, quote: &str, suffix: &str) -> String {
        format!(
            "{q}{}{q}.{q}{}{}{q}",
            self.final_namespace,
            self.final_name,
            suffix,
            q = quote
        )
    }

    /// Fully qualified raw table.
    pub fn raw_table_id(&self, quote: &str) -> String {
        format!(
            "{q}{}{q}.{q}{}{q}",
            self.raw_namespace,
            self.raw_name,
            q = quote
        )
    }

    pub fn final_name_quoted(&self, quote: &str) -> String {
        format!("{q}{}{q}", self.final_name, q = quote)
    }

    pub fn final_namespace_quoted(&self, quote: &str) -> String {
        format!("{q}{}{q}", self.final_namespace, q = quote)
    }

    /// The user-declared `(namespace, name)` pair.
    pub fn as_pair(&self) -> (String, String) {
        (self.original_namespace.clone(), self.original_name.clone())
    }

    pub fn as_stream_descriptor(&self) -> StreamDescriptor {
        StreamDescriptor::new(self.original_namespace.clone(), self.original_name.clone())
    }

    /// Build the raw table name for a stream.
    ///
    /// The namespace and name are joined by `_raw`, a run of underscores one
    /// longer than any run in either input, and `_stream_`. Because the
    /// separator run is strictly the longest one in the result, distinct
    /// `(namespace, name)` pairs never map to the same raw table.
    pub fn concatenate_raw_table_name(namespace: &str, name: &str) -> String {
        let mut longest = 0;
        let mut current = 0;
        for c in namespace.chars().chain(name.chars()) {
            if c == '_' {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }

        let underscores = "_".repeat(longest + 1);
        format!("{}_raw{}_stream_{}", namespace, underscores, name)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.original_namespace, self.original_name)
    }
}

/// Every name a column is known by.
///
/// `canonical_name` exists only for collision detection: two columns in one
/// stream never share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnId {
    /// Destination-safe identifier.
    pub name: String,
    /// Key in the raw JSON record.
    pub original_name: String,
    pub canonical_name: String,
}

impl ColumnId {
    pub fn new(
        name: impl Into<String>,
        original_name: impl Into<String>,
        canonical_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            original_name: original_name.into(),
            canonical_name: canonical_name.into(),
        }
    }

    pub fn name_quoted(&self, quote: &str) -> String {
        format!("{q}{}{q}", self.name, q = quote)
    }
}

/// Validate an identifier before it is embedded in SQL text.
///
/// Rejects empty identifiers, null bytes and identifiers longer than
/// `max_length` characters.
pub fn validate_identifier(name: &str, max_length: usize) -> Result<()> {
    if name.is_empty() {
        return Err(TypeDedupeError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TypeDedupeError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let length = name.chars().count();
    if length > max_length {
        return Err(TypeDedupeError::Config(format!(
            "Identifier exceeds maximum length of {} characters (got {}): {:?}",
            max_length, length, name
        )));
    }

    Ok(())
}

/// Wrap an identifier in `quote`, doubling any embedded quote characters.
pub fn quote_ident(name: &str, quote: &str) -> String {
    if quote.is_empty() {
        return name.to_string();
    }
    format!(
        "{q}{}{q}",
        name.replace(quote, &format!("{q}{q}", q = quote)),
        q = quote
    )
}

/// Truncate to at most `max_length` characters, respecting char boundaries.
pub fn truncate_identifier(name: &str, max_length: usize) -> String {
    name.chars().take(max_length).collect()
}
