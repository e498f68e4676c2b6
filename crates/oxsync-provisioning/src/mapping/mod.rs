//! Attribute mapping
//!
//! Declarative translation of local directory attributes into remote
//! properties. One table per [`ObjectKind`], keyed by remote property name.
//! Tables come from an operator-edited JSON file; kinds without a section
//! fall back to the built-in tables in [`defaults`].
//!
//! The mapper degrades individual properties instead of failing: every
//! problem with a value is returned as a [`MappingWarning`] and logged.
//! Only an unreadable or malformed mapping file is an error.

pub mod defaults;
pub mod transform;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use oxsync_remote::operation::{AttributeSet, AttributeValue};
use oxsync_remote::types::ObjectKind;

use crate::config::EngineConfig;
use crate::event::Attributes;

/// Mapping table for one kind: remote property → mapping.
pub type MappingTable = BTreeMap<String, PropertyMapping>;

/// Special value transforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialHandling {
    #[default]
    None,
    /// `YYYY-MM-DD` / `DD.MM.YYYY` normalized to `YYYY-MM-DD`.
    Date,
    /// Base64 image, JPEG only.
    Image,
    /// IMAP server split into `imap_server`, `imap_port`, `imap_schema`.
    ImapUrl,
    /// SMTP server split into `smtp_server`, `smtp_port`, `smtp_schema`.
    SmtpUrl,
}

/// How one remote property is derived from local attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyMapping {
    /// Local attribute to read. `None` leaves the remote property untouched.
    pub local_attribute: Option<String>,
    /// Whether an empty value is expected.
    pub nilable: bool,
    /// Keep sequences as sequences even with a single element.
    pub multi_value: bool,
    /// Attributes tried in order when `local_attribute` is empty.
    pub alternate_local_attributes: Vec<String>,
    /// Take the Nth element of a sequence value.
    pub position: Option<usize>,
    pub special_handling: SpecialHandling,
}

impl Default for PropertyMapping {
    fn default() -> Self {
        Self {
            local_attribute: None,
            nilable: true,
            multi_value: false,
            alternate_local_attributes: Vec::new(),
            position: None,
            special_handling: SpecialHandling::None,
        }
    }
}

impl PropertyMapping {
    /// Map from `attribute`.
    pub fn from_attribute(attribute: impl Into<String>) -> Self {
        Self {
            local_attribute: Some(attribute.into()),
            ..Self::default()
        }
    }

    /// A property this sync never touches.
    pub fn unmapped() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nilable = false;
        self
    }

    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.multi_value = true;
        self
    }

    #[must_use]
    pub fn with_alternates<I, S>(mut self, alternates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternate_local_attributes = alternates.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn at_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    #[must_use]
    pub fn with_special(mut self, special: SpecialHandling) -> Self {
        self.special_handling = special;
        self
    }
}

/// Mapping file errors.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("cannot read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mapping file {path}: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown section '{section}' in mapping file {path}")]
    UnknownSection { path: PathBuf, section: String },
}

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// A degraded property.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingWarning {
    #[error("{property}: required attribute {attribute} is empty")]
    EmptyValue { property: String, attribute: String },

    #[error("{property}: {reason}")]
    InvalidDate { property: String, reason: String },

    #[error("{property}: {reason}")]
    InvalidImage { property: String, reason: String },

    #[error("{property}: {reason}")]
    InvalidServer { property: String, reason: String },
}

impl MappingWarning {
    /// The remote property affected.
    pub fn property(&self) -> &str {
        match self {
            MappingWarning::EmptyValue { property, .. }
            | MappingWarning::InvalidDate { property, .. }
            | MappingWarning::InvalidImage { property, .. }
            | MappingWarning::InvalidServer { property, .. } => property,
        }
    }
}

/// The attribute mapper.
#[derive(Debug)]
pub struct AttributeMapper {
    path: Option<PathBuf>,
    tables: HashMap<ObjectKind, MappingTable>,
    stale: bool,
    imap_default: Url,
    smtp_default: Url,
}

impl AttributeMapper {
    /// Mapper using only the built-in tables.
    pub fn builtin(imap_default: Url, smtp_default: Url) -> Self {
        Self {
            path: None,
            tables: builtin_tables(),
            stale: false,
            imap_default,
            smtp_default,
        }
    }

    /// Mapper backed by the file at `path`.
    pub fn load(
        path: impl Into<PathBuf>,
        imap_default: Url,
        smtp_default: Url,
    ) -> MappingResult<Self> {
        let path = path.into();
        let tables = read_tables(&path)?;
        Ok(Self {
            path: Some(path),
            tables,
            stale: false,
            imap_default,
            smtp_default,
        })
    }

    /// Mapper for an engine configuration.
    pub fn from_config(config: &EngineConfig) -> MappingResult<Self> {
        Self::load(
            &config.mapping_file,
            config.imap_server.clone(),
            config.smtp_server.clone(),
        )
    }

    /// Mark the tables stale; they are re-read on next use.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Re-read the mapping file now.
    pub fn reload(&mut self) -> MappingResult<()> {
        self.tables = match &self.path {
            Some(path) => read_tables(path)?,
            None => builtin_tables(),
        };
        self.stale = false;
        info!(path = ?self.path, "attribute mapping reloaded");
        Ok(())
    }

    fn ensure_fresh(&mut self) -> MappingResult<()> {
        if self.stale {
            self.reload()?;
        }
        Ok(())
    }

    /// The current table for `kind`.
    pub fn table(&mut self, kind: ObjectKind) -> MappingResult<&MappingTable> {
        self.ensure_fresh()?;
        Ok(self.table_ref(kind))
    }

    fn table_ref(&self, kind: ObjectKind) -> &MappingTable {
        // Every kind is present after a load; the empty table is unreachable.
        static EMPTY: MappingTable = BTreeMap::new();
        self.tables.get(&kind).unwrap_or(&EMPTY)
    }

    /// Map every property of `kind` from `source` into `target`.
    pub fn apply(
        &mut self,
        kind: ObjectKind,
        target: &mut AttributeSet,
        source: &Attributes,
    ) -> MappingResult<Vec<MappingWarning>> {
        self.ensure_fresh()?;
        let mut warnings = Vec::new();
        for (property, mapping) in self.table_ref(kind) {
            warnings.extend(self.set_property(target, property, mapping, source));
        }
        Ok(warnings)
    }

    /// Map one property. Never fails; problems come back as warnings and the
    /// property is left unset or cleared.
    pub fn set_property(
        &self,
        target: &mut AttributeSet,
        property: &str,
        mapping: &PropertyMapping,
        source: &Attributes,
    ) -> Vec<MappingWarning> {
        let mut warnings = Vec::new();
        let Some(attribute) = mapping.local_attribute.as_deref() else {
            return warnings;
        };

        let mut value = non_empty(source, attribute);
        if value.is_none() {
            for alternate in &mapping.alternate_local_attributes {
                if let Some(found) = non_empty(source, alternate) {
                    info!(property, attribute, alternate = %alternate, "using alternate attribute");
                    value = Some(found);
                    break;
                }
            }
        }
        if value.is_none() && !mapping.nilable {
            push_warning(
                &mut warnings,
                MappingWarning::EmptyValue {
                    property: property.to_string(),
                    attribute: attribute.to_string(),
                },
            );
        }

        let mut value = value.cloned().unwrap_or(Value::Null);
        if let Some(position) = mapping.position {
            value = nth(value, position);
        }
        let value = shape(value, mapping.multi_value);

        match mapping.special_handling {
            SpecialHandling::None => target.set(property, AttributeValue::from_json(&value)),
            SpecialHandling::Date => match text(&value) {
                None => target.set(property, AttributeValue::Null),
                Some(raw) => match transform::normalize_date(&raw) {
                    Ok(date) => target.set(property, date),
                    Err(reason) => push_warning(
                        &mut warnings,
                        MappingWarning::InvalidDate {
                            property: property.to_string(),
                            reason,
                        },
                    ),
                },
            },
            SpecialHandling::Image => {
                let content_type = format!("{property}_content_type");
                match text(&value) {
                    None => {
                        target.set(property, AttributeValue::Null);
                        target.set(content_type, AttributeValue::Null);
                    }
                    Some(raw) => match transform::decode_jpeg(&raw) {
                        Ok(bytes) => {
                            target.set(property, bytes);
                            target.set(content_type, transform::JPEG_CONTENT_TYPE);
                        }
                        Err(reason) => {
                            target.set(property, AttributeValue::Null);
                            target.set(content_type, AttributeValue::Null);
                            push_warning(
                                &mut warnings,
                                MappingWarning::InvalidImage {
                                    property: property.to_string(),
                                    reason,
                                },
                            );
                        }
                    },
                }
            }
            SpecialHandling::ImapUrl | SpecialHandling::SmtpUrl => {
                let (prefix, default) = if mapping.special_handling == SpecialHandling::ImapUrl {
                    ("imap", &self.imap_default)
                } else {
                    ("smtp", &self.smtp_default)
                };
                match transform::split_server_url(text(&value).as_deref(), default) {
                    Ok(parts) => {
                        target.set(format!("{prefix}_server"), parts.server);
                        target.set(format!("{prefix}_port"), parts.port);
                        target.set(format!("{prefix}_schema"), parts.schema);
                    }
                    Err(reason) => push_warning(
                        &mut warnings,
                        MappingWarning::InvalidServer {
                            property: property.to_string(),
                            reason,
                        },
                    ),
                }
            }
        }

        warnings
    }
}

fn push_warning(warnings: &mut Vec<MappingWarning>, warning: MappingWarning) {
    warn!(property = warning.property(), "{warning}");
    warnings.push(warning);
}

fn builtin_tables() -> HashMap<ObjectKind, MappingTable> {
    ObjectKind::all()
        .iter()
        .map(|kind| (*kind, defaults::builtin_table(*kind)))
        .collect()
}

fn read_tables(path: &Path) -> MappingResult<HashMap<ObjectKind, MappingTable>> {
    let mut tables = builtin_tables();
    if !path.exists() {
        debug!(path = %path.display(), "no mapping file, using built-in tables");
        return Ok(tables);
    }

    let raw = fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sections: BTreeMap<String, MappingTable> =
        serde_json::from_str(&raw).map_err(|source| MappingError::InvalidFile {
            path: path.to_path_buf(),
            source,
        })?;

    for (section, table) in sections {
        let kind: ObjectKind = section
            .parse()
            .map_err(|_| MappingError::UnknownSection {
                path: path.to_path_buf(),
                section: section.clone(),
            })?;
        tables.insert(kind, table);
    }
    Ok(tables)
}

fn non_empty<'a>(source: &'a Attributes, name: &str) -> Option<&'a Value> {
    if source.is_empty_value(name) {
        None
    } else {
        source.get(name)
    }
}

fn nth(value: Value, position: usize) -> Value {
    match value {
        Value::Array(items) => items.into_iter().nth(position).unwrap_or(Value::Null),
        Value::Null => Value::Null,
        scalar if position == 0 => scalar,
        _ => Value::Null,
    }
}

fn shape(value: Value, multi_value: bool) -> Value {
    match value {
        Value::Array(mut items) if !multi_value && items.len() == 1 => items.remove(0),
        Value::Null => Value::Null,
        Value::Array(items) => Value::Array(items),
        scalar if multi_value => Value::Array(vec![scalar]),
        scalar => scalar,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;

    fn mapper() -> AttributeMapper {
        AttributeMapper::builtin(
            Url::parse("imap://imap.example.org:143").unwrap(),
            Url::parse("smtp://smtp.example.org:587").unwrap(),
        )
    }

    #[test]
    fn test_alternate_fallback() {
        let mapping = PropertyMapping::from_attribute("A").with_alternates(["B"]);
        let source = Attributes::new().with("A", "").with("B", "v");
        let mut target = AttributeSet::new();

        let warnings = mapper().set_property(&mut target, "X", &mapping, &source);

        assert!(warnings.is_empty());
        assert_eq!(target.get_string("X"), Some("v"));
    }

    #[test]
    fn test_alternates_tried_in_order() {
        let mapping = PropertyMapping::from_attribute("A").with_alternates(["B", "C"]);
        let source = Attributes::new().with("B", json!([])).with("C", "c");
        let mut target = AttributeSet::new();
        mapper().set_property(&mut target, "X", &mapping, &source);
        assert_eq!(target.get_string("X"), Some("c"));
    }

    #[test]
    fn test_unmapped_property_is_inert() {
        let mut target = AttributeSet::new().with("X", "remote");
        let source = Attributes::new().with("X", "local");
        let warnings =
            mapper().set_property(&mut target, "X", &PropertyMapping::unmapped(), &source);
        assert!(warnings.is_empty());
        assert_eq!(target.get_string("X"), Some("remote"));
    }

    #[test]
    fn test_required_empty_warns_and_clears() {
        let mapping = PropertyMapping::from_attribute("lastname").required();
        let mut target = AttributeSet::new();
        let warnings = mapper().set_property(&mut target, "sur_name", &mapping, &Attributes::new());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].property(), "sur_name");
        assert!(target.get("sur_name").is_some_and(AttributeValue::is_null));
    }

    #[test]
    fn test_position_and_collapse() {
        let source = Attributes::new().with("phone", json!(["111", "222"]));
        let mut target = AttributeSet::new();
        let m = mapper();
        m.set_property(
            &mut target,
            "t1",
            &PropertyMapping::from_attribute("phone").at_position(1),
            &source,
        );
        m.set_property(
            &mut target,
            "t3",
            &PropertyMapping::from_attribute("phone").at_position(2),
            &source,
        );
        assert_eq!(target.get_string("t1"), Some("222"));
        assert!(target.get("t3").is_some_and(AttributeValue::is_null));

        let single = Attributes::new().with("mail", json!(["a@example.org"]));
        m.set_property(&mut target, "one", &PropertyMapping::from_attribute("mail"), &single);
        m.set_property(
            &mut target,
            "many",
            &PropertyMapping::from_attribute("mail").multi_valued(),
            &single,
        );
        assert_eq!(target.get_string("one"), Some("a@example.org"));
        assert!(target.get("many").is_some_and(AttributeValue::is_multi_valued));
    }

    #[test]
    fn test_date_handling() {
        let mapping = PropertyMapping::from_attribute("birthday").with_special(SpecialHandling::Date);
        let m = mapper();

        let mut target = AttributeSet::new();
        m.set_property(&mut target, "birthday", &mapping, &Attributes::new().with("birthday", "07.03.1984"));
        assert_eq!(target.get_string("birthday"), Some("1984-03-07"));

        let mut target = AttributeSet::new();
        let warnings = m.set_property(
            &mut target,
            "birthday",
            &mapping,
            &Attributes::new().with("birthday", "1850-01-01"),
        );
        assert_eq!(warnings.len(), 1);
        assert!(!target.has("birthday"));
    }

    #[test]
    fn test_image_handling() {
        let mapping = PropertyMapping::from_attribute("jpegPhoto").with_special(SpecialHandling::Image);
        let m = mapper();

        let jpeg = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xDB]);
        let mut target = AttributeSet::new();
        let warnings =
            m.set_property(&mut target, "image1", &mapping, &Attributes::new().with("jpegPhoto", jpeg));
        assert!(warnings.is_empty());
        assert_eq!(target.get_string("image1_content_type"), Some("image/jpeg"));
        assert!(matches!(target.get("image1"), Some(AttributeValue::Binary(_))));

        let png = STANDARD.encode(b"\x89PNG\r\n\x1a\n");
        let mut target = AttributeSet::new().with("image1", vec![1u8]);
        let warnings =
            m.set_property(&mut target, "image1", &mapping, &Attributes::new().with("jpegPhoto", png));
        assert_eq!(warnings.len(), 1);
        assert!(target.get("image1").is_some_and(AttributeValue::is_null));
    }

    #[test]
    fn test_server_handling() {
        let mapping =
            PropertyMapping::from_attribute("oxImapServer").with_special(SpecialHandling::ImapUrl);
        let mut target = AttributeSet::new();
        mapper().set_property(&mut target, "imap_server", &mapping, &Attributes::new());
        assert_eq!(target.get_string("imap_server"), Some("imap.example.org"));
        assert_eq!(target.get_integer("imap_port"), Some(143));
        assert_eq!(target.get_string("imap_schema"), Some("imap://"));

        let mapping =
            PropertyMapping::from_attribute("oxSmtpServer").with_special(SpecialHandling::SmtpUrl);
        let mut target = AttributeSet::new();
        mapper().set_property(
            &mut target,
            "smtp_server",
            &mapping,
            &Attributes::new().with("oxSmtpServer", "smtps://relay.example.org"),
        );
        assert_eq!(target.get_string("smtp_server"), Some("relay.example.org"));
        assert_eq!(target.get_integer("smtp_port"), Some(465));
    }

    #[test]
    fn test_mapping_file_sections_override_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AttributeMapping.json");
        fs::write(
            &path,
            r#"{"user": {"name": {"local_attribute": "uid", "nilable": false}}}"#,
        )
        .unwrap();

        let mut m = AttributeMapper::load(
            &path,
            Url::parse("imap://localhost:143").unwrap(),
            Url::parse("smtp://localhost:587").unwrap(),
        )
        .unwrap();

        assert_eq!(m.table(ObjectKind::User).unwrap().len(), 1);
        assert_eq!(
            m.table(ObjectKind::Group).unwrap(),
            &defaults::builtin_table(ObjectKind::Group)
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AttributeMapping.json");
        fs::write(&path, "{ not json").unwrap();
        let err = AttributeMapper::load(
            &path,
            Url::parse("imap://localhost:143").unwrap(),
            Url::parse("smtp://localhost:587").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::InvalidFile { .. }));

        fs::write(&path, r#"{"printer": {}}"#).unwrap();
        let err = AttributeMapper::load(
            &path,
            Url::parse("imap://localhost:143").unwrap(),
            Url::parse("smtp://localhost:587").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::UnknownSection { .. }));
    }

    #[test]
    fn test_invalidate_reloads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AttributeMapping.json");
        let mut m = AttributeMapper::load(
            &path,
            Url::parse("imap://localhost:143").unwrap(),
            Url::parse("smtp://localhost:587").unwrap(),
        )
        .unwrap();
        assert!(m.table(ObjectKind::Group).unwrap().contains_key("note"));

        fs::write(&path, r#"{"group": {"name": {"local_attribute": "cn"}}}"#).unwrap();
        assert!(m.table(ObjectKind::Group).unwrap().contains_key("note"));

        m.invalidate();
        assert!(!m.table(ObjectKind::Group).unwrap().contains_key("note"));
    }
}
