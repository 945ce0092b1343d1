use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::record::{guess_kind, Kind};

const FULLTEXT_FIELD: &str = "fulltext";
const INGEST_TIMESTAMP_FIELD: &str = "@timestamp";

const DATE_FORMAT: &str = "strict_date";
const TIME_FORMAT: &str =
    "strict_time_no_millis||strict_time||strict_hour_minute_second||strict_hour_minute_second_fraction";
const DATETIME_FORMAT: &str = "strict_date_time_no_millis||strict_date_time";

/// Index-level knobs carried into the settings block.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub shards: u32,
    pub replicas: u32,
    pub check_on_startup: bool,
    pub refresh_interval: Duration,
}

/// The full index-creation payload: settings plus per-field mappings.
#[derive(Debug, Serialize)]
pub struct IndexOptions {
    settings: Settings,
    mappings: Mappings,
}

#[derive(Debug, Serialize)]
struct Settings {
    number_of_shards: u32,
    number_of_replicas: u32,
    shard: ShardSettings,
    refresh_interval: String,
}

#[derive(Debug, Serialize)]
struct ShardSettings {
    check_on_startup: bool,
}

#[derive(Debug, Serialize)]
struct Mappings {
    #[serde(rename = "accesslogs")]
    doc: DocType,
}

#[derive(Debug, Serialize)]
struct DocType {
    properties: BTreeMap<String, FieldDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    store: bool,
    #[serde(rename = "copy_to", skip_serializing_if = "Option::is_none")]
    copy_to: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<SubFields>,
}

#[derive(Debug, Serialize)]
struct SubFields {
    raw: RawKeyword,
}

#[derive(Debug, Serialize)]
struct RawKeyword {
    #[serde(rename = "type")]
    typ: &'static str,
}

impl FieldDescriptor {
    fn plain(typ: &'static str) -> Self {
        Self { typ, format: None, store: true, copy_to: None, fields: None }
    }

    fn keyword(copy_full: bool) -> Self {
        Self {
            copy_to: copy_full.then_some(FULLTEXT_FIELD),
            ..Self::plain("keyword")
        }
    }

    fn text(copy_full: bool) -> Self {
        Self {
            copy_to: copy_full.then_some(FULLTEXT_FIELD),
            ..Self::plain("text")
        }
    }

    /// Searchable text with an exact-match `raw` sub-field, feeding the
    /// aggregate full-text field.
    fn multi() -> Self {
        Self {
            copy_to: Some(FULLTEXT_FIELD),
            fields: Some(SubFields { raw: RawKeyword { typ: "keyword" } }),
            ..Self::plain("text")
        }
    }

    fn date() -> Self {
        Self { format: Some(DATE_FORMAT), ..Self::plain("date") }
    }

    fn time() -> Self {
        Self { format: Some(TIME_FORMAT), ..Self::plain("date") }
    }

    fn datetime() -> Self {
        Self { format: Some(DATETIME_FORMAT), ..Self::plain("date") }
    }

    /// The aggregate full-text target: receives copy-through only, never
    /// stored as its own source value.
    fn fulltext() -> Self {
        Self { store: false, ..Self::plain("text") }
    }
}

/// Build the index-creation payload from the declared field names.
///
/// Fields whose lower-cased name is in `excludes` are skipped entirely.
/// A handful of well-known fields get hand-tuned descriptors; everything
/// else is typed through the same kind guessing the storage path uses.
pub fn index_options(
    field_names: &[String],
    excludes: &HashSet<String>,
    settings: &IndexSettings,
) -> IndexOptions {
    let mut properties = BTreeMap::new();

    for name in field_names {
        let lower = name.to_ascii_lowercase();
        if excludes.contains(&lower) {
            continue;
        }
        let descriptor = match lower.as_str() {
            "cs(user-agent)" => FieldDescriptor::text(true),
            "cs-host" | "cs-uri-path" | "cs-uri-query" => FieldDescriptor::multi(),
            _ => match guess_kind(name) {
                Kind::Date => FieldDescriptor::date(),
                Kind::Time => FieldDescriptor::time(),
                Kind::Timestamp => FieldDescriptor::datetime(),
                Kind::Ip => FieldDescriptor::plain("ip"),
                Kind::Float64 => FieldDescriptor::plain("double"),
                Kind::Int64 => FieldDescriptor::plain("long"),
                Kind::Bool => FieldDescriptor::plain("boolean"),
                Kind::Uri => FieldDescriptor::keyword(false),
                Kind::String => FieldDescriptor::keyword(true),
            },
        };
        properties.insert(name.clone(), descriptor);
    }

    properties.insert(
        INGEST_TIMESTAMP_FIELD.to_string(),
        FieldDescriptor::datetime(),
    );
    properties.insert(FULLTEXT_FIELD.to_string(), FieldDescriptor::fulltext());

    IndexOptions {
        settings: Settings {
            number_of_shards: settings.shards,
            number_of_replicas: settings.replicas,
            shard: ShardSettings { check_on_startup: settings.check_on_startup },
            refresh_interval: format!("{}s", settings.refresh_interval.as_secs()),
        },
        mappings: Mappings { doc: DocType { properties } },
    }
}
