//! Configured catalog to [`ParsedCatalog`] translation.
//!
//! Destination naming rules can map distinct source names onto the same
//! identifier (case folding, truncation, character replacement). The parser
//! resolves those collisions deterministically, so the same catalog always
//! produces the same tables:
//!
//! - Streams whose final or raw table would clash with an earlier stream get
//!   `_<3 hex chars>` appended to their name. The hash reproduces the legacy
//!   normalization naming, so existing tables keep their names.
//! - Columns whose canonical name clashes get `_1`, `_2`, ... appended. When
//!   truncation swallows the suffix, the name is shortened to
//!   `<prefix><elided length><suffix>` instead.
//!
//! Original names always survive on the resolved identifiers: records are
//! routed and extracted by what the source declared.

use std::sync::Arc;

use indexmap::IndexMap;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use super::protocol::{ConfiguredCatalog, ConfiguredStream};
use crate::core::{
    AirbyteType, ColumnId, ImportType, ParsedCatalog, SqlGenerator, StreamConfig, StreamId,
    NO_SUFFIX,
};
use crate::error::{Result, TypeDedupeError};

/// Characters reserved for the elided length in a supertruncated name.
const LENGTH_DIGITS: usize = 5;

pub struct CatalogParser {
    sql_generator: Arc<dyn SqlGenerator>,
    default_namespace: String,
    raw_namespace: String,
}

impl CatalogParser {
    pub fn new(
        sql_generator: Arc<dyn SqlGenerator>,
        default_namespace: impl Into<String>,
        raw_namespace: impl Into<String>,
    ) -> Self {
        Self {
            sql_generator,
            default_namespace: default_namespace.into(),
            raw_namespace: raw_namespace.into(),
        }
    }

    /// Resolve every configured stream, in catalog order.
    pub fn parse_catalog(&self, catalog: &ConfiguredCatalog) -> Result<ParsedCatalog> {
        let mut streams: Vec<StreamConfig> = Vec::with_capacity(catalog.streams.len());

        for configured in &catalog.streams {
            let original = self.to_stream_config(configured)?;
            let final_table = original.id.final_table_id("", NO_SUFFIX);
            let raw_table = original.id.raw_table_id("");

            let collides = streams.iter().any(|s| {
                s.id.final_table_id("", NO_SUFFIX) == final_table
                    || s.id.raw_table_id("") == raw_table
            });

            if collides {
                let resolved = self.rename_colliding_stream(original);
                streams.push(resolved);
            } else {
                streams.push(original);
            }
        }

        Ok(ParsedCatalog::new(streams))
    }

    fn rename_colliding_stream(&self, original: StreamConfig) -> StreamConfig {
        let original_namespace = original.id.original_namespace.clone();
        let original_name = original.id.original_name.clone();

        let digest = Sha1::digest(
            format!("{}&airbyte&{}", original.id.final_namespace, original_name).as_bytes(),
        );
        let hash = hex::encode(digest);
        let new_name = format!("{}_{}", original_name, &hash[..3]);

        let renamed = self
            .sql_generator
            .build_stream_id(&original_namespace, &new_name, &self.raw_namespace);
        warn!(
            "Detected table name collision for {}.{}. Writing to final table {}.{} and raw table {}.{} instead.",
            original_namespace,
            original_name,
            renamed.final_namespace,
            renamed.final_name,
            renamed.raw_namespace,
            renamed.raw_name
        );

        StreamConfig {
            id: StreamId::new(
                renamed.final_namespace,
                renamed.final_name,
                renamed.raw_namespace,
                renamed.raw_name,
                original_namespace,
                original_name,
            ),
            ..original
        }
    }

    /// Build a stream config without looking at other streams.
    pub fn to_stream_config(&self, configured: &ConfiguredStream) -> Result<StreamConfig> {
        let stream = &configured.stream;
        let namespace = stream
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.default_namespace.as_str());
        let id = self
            .sql_generator
            .build_stream_id(namespace, &stream.name, &self.raw_namespace);

        let airbyte_columns = match AirbyteType::from_json_schema(&stream.json_schema) {
            AirbyteType::Struct(s) => s.properties,
            AirbyteType::Union(u) => u.as_columns(),
            other => {
                return Err(TypeDedupeError::Config(format!(
                    "Stream {}.{} has a top-level schema of type {}; expected an object",
                    namespace,
                    stream.name,
                    other.type_name()
                )));
            }
        };
        let columns = self.resolve_column_collisions(&id, airbyte_columns)?;

        let import_type = configured.destination_sync_mode.import_type();
        let primary_key = if import_type == ImportType::Dedupe {
            configured
                .primary_key
                .iter()
                .map(|path| match path.as_slice() {
                    [field] => Ok(self.lookup_column(&columns, field)),
                    _ => Err(TypeDedupeError::Config(format!(
                        "Only top-level primary keys are supported; stream {}.{} declares {:?}",
                        namespace, stream.name, path
                    ))),
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let cursor = match configured.cursor_field.as_slice() {
            [] => None,
            [field] => Some(self.lookup_column(&columns, field)),
            path => {
                return Err(TypeDedupeError::Config(format!(
                    "Only top-level cursors are supported; stream {}.{} declares {:?}",
                    namespace, stream.name, path
                )));
            }
        };

        Ok(StreamConfig {
            id,
            post_import_action: import_type,
            primary_key,
            cursor,
            columns,
            generation_id: configured.generation_id,
            minimum_generation_id: configured.minimum_generation_id,
            sync_id: configured.sync_id,
        })
    }

    /// The resolved column for a source field, so keys follow any renaming.
    fn lookup_column(&self, columns: &IndexMap<ColumnId, AirbyteType>, field: &str) -> ColumnId {
        columns
            .keys()
            .find(|c| c.original_name == field)
            .cloned()
            .unwrap_or_else(|| self.sql_generator.build_column_id(field))
    }

    fn resolve_column_collisions(
        &self,
        stream_id: &StreamId,
        airbyte_columns: IndexMap<String, AirbyteType>,
    ) -> Result<IndexMap<ColumnId, AirbyteType>> {
        let max_attempts = airbyte_columns.len() + 1;
        let mut columns: IndexMap<ColumnId, AirbyteType> = IndexMap::new();

        for (name, airbyte_type) in airbyte_columns {
            let original = self.sql_generator.build_column_id(&name);
            if !canonical_taken(&columns, &original.canonical_name) {
                columns.insert(original, airbyte_type);
                continue;
            }

            info!(
                "Detected column name collision for {} in stream {}",
                name, stream_id
            );

            let mut resolved = None;
            for i in 1..=max_attempts {
                let candidate = self
                    .sql_generator
                    .build_column_id_with_suffix(&name, &format!("_{}", i));
                if candidate.canonical_name == original.canonical_name {
                    // The suffix was truncated away.
                    break;
                }
                if !canonical_taken(&columns, &candidate.canonical_name) {
                    resolved = Some(candidate);
                    break;
                }
            }

            let resolved = match resolved {
                Some(c) => c,
                None => self.supertruncate(&original, &columns)?,
            };

            columns.insert(
                ColumnId::new(resolved.name, original.original_name.clone(), resolved.canonical_name),
                airbyte_type,
            );
        }

        Ok(columns)
    }

    /// Shorten `original` to `<prefix><elided length><suffix>`.
    ///
    /// The affix length starts at the largest that leaves room for the
    /// length digits and shrinks until the result is unique.
    fn supertruncate(
        &self,
        original: &ColumnId,
        columns: &IndexMap<ColumnId, AirbyteType>,
    ) -> Result<ColumnId> {
        let max_length = original.name.chars().count();
        let affix_length = max_length.saturating_sub(LENGTH_DIGITS) / 2;
        if affix_length == 0 {
            return Err(TypeDedupeError::column_collision(&original.original_name));
        }

        let chars: Vec<char> = original.original_name.chars().collect();
        for i in (1..=affix_length).rev() {
            if 2 * i > chars.len() {
                continue;
            }
            let prefix: String = chars[..i].iter().collect();
            let suffix: String = chars[chars.len() - i..].iter().collect();
            let candidate = self
                .sql_generator
                .build_column_id(&format!("{}{}{}", prefix, chars.len() - 2 * i, suffix));
            if !canonical_taken(columns, &candidate.canonical_name) {
                return Ok(candidate);
            }
        }

        Err(TypeDedupeError::column_collision(&original.original_name))
    }
}

fn canonical_taken(columns: &IndexMap<ColumnId, AirbyteType>, canonical_name: &str) -> bool {
    columns.keys().any(|c| c.canonical_name == canonical_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::protocol::{AirbyteStream, DestinationSyncMode};
    use crate::core::{AirbyteProtocolType, Sql};
    use chrono::{DateTime, Utc};
    use serde_json::json;

    /// Lower-cases everything and truncates column names.
    struct FoldingGenerator {
        max_column_length: usize,
    }

    impl SqlGenerator for FoldingGenerator {
        fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace: &str) -> StreamId {
            StreamId::new(
                namespace.to_lowercase(),
                name.to_lowercase(),
                raw_namespace.to_lowercase(),
                StreamId::concatenate_raw_table_name(namespace, name).to_lowercase(),
                namespace,
                name,
            )
        }

        fn build_column_id_with_suffix(&self, name: &str, suffix: &str) -> ColumnId {
            let truncated: String = format!("{}{}", name, suffix)
                .chars()
                .take(self.max_column_length)
                .collect();
            ColumnId::new(truncated.clone(), name, truncated.to_lowercase())
        }

        fn create_table(&self, _: &StreamConfig, _: &str, _: bool) -> Sql {
            Sql::empty()
        }
        fn create_schema(&self, _: &str) -> Sql {
            Sql::empty()
        }
        fn update_table(&self, _: &StreamConfig, _: &str, _: Option<DateTime<Utc>>, _: bool) -> Sql {
            Sql::empty()
        }
        fn overwrite_final_table(&self, _: &StreamId, _: &str) -> Sql {
            Sql::empty()
        }
        fn migrate_from_v1_to_v2(&self, _: &StreamId, _: &str, _: &str) -> Sql {
            Sql::empty()
        }
        fn clear_loaded_at(&self, _: &StreamId) -> Sql {
            Sql::empty()
        }
    }

    fn parser(max_column_length: usize) -> CatalogParser {
        CatalogParser::new(
            Arc::new(FoldingGenerator { max_column_length }),
            "public",
            "airbyte_internal",
        )
    }

    fn configured(namespace: Option<&str>, name: &str, schema: serde_json::Value) -> ConfiguredStream {
        ConfiguredStream {
            stream: AirbyteStream {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
                json_schema: schema,
            },
            destination_sync_mode: DestinationSyncMode::Append,
            cursor_field: Vec::new(),
            primary_key: Vec::new(),
            generation_id: 0,
            minimum_generation_id: 0,
            sync_id: 0,
        }
    }

    fn object(properties: &[&str]) -> serde_json::Value {
        let props: serde_json::Map<String, serde_json::Value> = properties
            .iter()
            .map(|p| (p.to_string(), json!({"type": "string"})))
            .collect();
        json!({"type": "object", "properties": props})
    }

    fn catalog(streams: Vec<ConfiguredStream>) -> ConfiguredCatalog {
        ConfiguredCatalog { streams }
    }

    fn column_names(stream: &StreamConfig) -> Vec<(String, String)> {
        stream
            .columns
            .keys()
            .map(|c| (c.name.clone(), c.original_name.clone()))
            .collect()
    }

    #[test]
    fn test_stream_name_collision_gets_hash_suffix() {
        let parsed = parser(128)
            .parse_catalog(&catalog(vec![
                configured(Some("a"), "foo", object(&["id"])),
                configured(Some("a"), "Foo", object(&["id"])),
            ]))
            .unwrap();

        let first = &parsed.streams[0].id;
        let second = &parsed.streams[1].id;
        assert_eq!(first.final_name, "foo");
        assert_eq!(second.final_name, "foo_604");
        assert_ne!(first.raw_name, second.raw_name);
        assert_eq!(second.original_namespace, "a");
        assert_eq!(second.original_name, "Foo");
        assert!(parsed.get_stream("a", "Foo").is_ok());
    }

    #[test]
    fn test_missing_namespace_uses_default() {
        let parsed = parser(128)
            .parse_catalog(&catalog(vec![configured(None, "users", object(&["id"]))]))
            .unwrap();
        let id = &parsed.streams[0].id;
        assert_eq!(id.final_namespace, "public");
        assert_eq!(id.original_namespace, "public");
        assert_eq!(id.raw_namespace, "airbyte_internal");
    }

    #[test]
    fn test_column_collision_appends_suffix() {
        let parsed = parser(128)
            .parse_catalog(&catalog(vec![configured(
                Some("ns"),
                "s",
                object(&["CAPITAL_case", "capital_case", "Capital_Case"]),
            )]))
            .unwrap();

        assert_eq!(
            column_names(&parsed.streams[0]),
            vec![
                ("CAPITAL_case".to_string(), "CAPITAL_case".to_string()),
                ("capital_case_1".to_string(), "capital_case".to_string()),
                ("Capital_Case_2".to_string(), "Capital_Case".to_string()),
            ]
        );
    }

    #[test]
    fn test_truncated_suffix_falls_back_to_supertruncation() {
        let parsed = parser(10)
            .parse_catalog(&catalog(vec![configured(
                Some("ns"),
                "s",
                object(&["aVeryLongColumnName", "aVeryLongColumnNameX"]),
            )]))
            .unwrap();

        assert_eq!(
            column_names(&parsed.streams[0]),
            vec![
                ("aVeryLongC".to_string(), "aVeryLongColumnName".to_string()),
                ("aV16eX".to_string(), "aVeryLongColumnNameX".to_string()),
            ]
        );
    }

    #[test]
    fn test_unresolvable_column_collision() {
        let err = parser(6)
            .parse_catalog(&catalog(vec![configured(
                Some("ns"),
                "s",
                object(&["abcdefg1", "abcdefg2"]),
            )]))
            .unwrap_err();
        assert!(matches!(err, TypeDedupeError::ColumnCollision { ref column } if column == "abcdefg2"));
    }

    #[test]
    fn test_canonical_names_are_unique() {
        let names = ["a", "A", "a_1", "A_1", "a_2", "b"];
        let parsed = parser(128)
            .parse_catalog(&catalog(vec![configured(Some("ns"), "s", object(&names))]))
            .unwrap();

        let mut canonical: Vec<&str> = parsed.streams[0]
            .columns
            .keys()
            .map(|c| c.canonical_name.as_str())
            .collect();
        assert_eq!(canonical.len(), names.len());
        canonical.sort_unstable();
        canonical.dedup();
        assert_eq!(canonical.len(), names.len());
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let input = catalog(vec![
            configured(Some("a"), "foo", object(&["x", "X", "x_1"])),
            configured(Some("a"), "FOO", object(&["y"])),
        ]);
        let first = parser(128).parse_catalog(&input).unwrap();
        let second = parser(128).parse_catalog(&input).unwrap();
        assert_eq!(first.streams, second.streams);
    }

    #[test]
    fn test_dedup_keys_and_cursor() {
        let mut stream = configured(Some("ns"), "users", object(&["id", "ID", "updated_at"]));
        stream.destination_sync_mode = DestinationSyncMode::AppendDedup;
        stream.primary_key = vec![vec!["ID".to_string()]];
        stream.cursor_field = vec!["updated_at".to_string()];
        stream.generation_id = 4;
        stream.minimum_generation_id = 4;

        let parsed = parser(128).parse_catalog(&catalog(vec![stream])).unwrap();
        let config = &parsed.streams[0];
        assert_eq!(config.post_import_action, ImportType::Dedupe);
        assert_eq!(config.primary_key[0].name, "ID_1");
        assert_eq!(config.primary_key[0].original_name, "ID");
        assert_eq!(config.cursor.as_ref().map(|c| c.name.as_str()), Some("updated_at"));
        assert!(config.is_truncate_sync());
    }

    #[test]
    fn test_append_ignores_primary_key() {
        let mut stream = configured(Some("ns"), "users", object(&["id"]));
        stream.primary_key = vec![vec!["id".to_string()]];
        let parsed = parser(128).parse_catalog(&catalog(vec![stream])).unwrap();
        assert!(parsed.streams[0].primary_key.is_empty());
    }

    #[test]
    fn test_nested_keys_are_rejected() {
        let mut stream = configured(Some("ns"), "users", object(&["id"]));
        stream.destination_sync_mode = DestinationSyncMode::AppendDedup;
        stream.primary_key = vec![vec!["address".to_string(), "zip".to_string()]];
        assert!(matches!(
            parser(128).parse_catalog(&catalog(vec![stream])),
            Err(TypeDedupeError::Config(_))
        ));

        let mut stream = configured(Some("ns"), "users", object(&["id"]));
        stream.cursor_field = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            parser(128).parse_catalog(&catalog(vec![stream])),
            Err(TypeDedupeError::Config(_))
        ));
    }

    #[test]
    fn test_top_level_schema_must_be_an_object() {
        let stream = configured(Some("ns"), "s", json!({"type": "string"}));
        assert!(matches!(
            parser(128).parse_catalog(&catalog(vec![stream])),
            Err(TypeDedupeError::Config(_))
        ));
    }

    #[test]
    fn test_union_top_level_schema_uses_object_option() {
        let stream = configured(
            Some("ns"),
            "s",
            json!({"type": ["null", "object"], "properties": {"id": {"type": "integer"}}}),
        );
        let parsed = parser(128).parse_catalog(&catalog(vec![stream])).unwrap();
        let (column, airbyte_type) = parsed.streams[0].columns.first().unwrap();
        assert_eq!(column.name, "id");
        assert_eq!(airbyte_type, &AirbyteType::Primitive(AirbyteProtocolType::Integer));
    }
}
