//! Bag schemas declared in TOML.
//!
//! ```toml
//! [[bags]]
//! name = "unit"
//! description = "Replicated unit state"
//!
//! [[bags.fields]]
//! name = "health"
//! type = "int32"
//! default = 100
//!
//! [[bags.fields]]
//! name = "buffs"
//! type = "name"
//! array = true
//! ```
//!
//! Field ids default to the field's position in its bag.

use std::path::Path;
use std::str::FromStr;

use attribute_types::{ContainerKind, FieldDesc, FieldType, FieldValue};
use serde::{Deserialize, Serialize};

use crate::error::{BagError, Result};

/// One named bag layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldDesc>,
}

/// A set of bag layouts, usually loaded from one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub bags: Vec<BagConfig>,
}

impl SchemaConfig {
    /// Parse a schema config from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct TomlConfig {
            #[serde(default)]
            bags: Vec<TomlBag>,
        }

        #[derive(Deserialize)]
        struct TomlBag {
            name: String,
            #[serde(default)]
            description: Option<String>,
            #[serde(default)]
            fields: Vec<TomlField>,
        }

        #[derive(Deserialize)]
        struct TomlField {
            name: String,
            #[serde(rename = "type")]
            field_type: String,
            #[serde(default)]
            id: Option<u32>,
            #[serde(default)]
            array: bool,
            #[serde(default)]
            default: Option<serde_json::Value>,
        }

        let parsed: TomlConfig =
            toml::from_str(content).map_err(|e| BagError::Parse(e.to_string()))?;

        let bags = parsed
            .bags
            .into_iter()
            .map(|bag| {
                let fields = bag
                    .fields
                    .into_iter()
                    .enumerate()
                    .map(|(position, field)| {
                        let field_type = FieldType::from_str(&field.field_type)?;
                        let container = if field.array {
                            ContainerKind::Array
                        } else {
                            ContainerKind::Single
                        };
                        let default = match &field.default {
                            Some(raw) => Some(
                                FieldValue::from_json(field_type, container, raw).ok_or_else(
                                    || BagError::TypeMismatch {
                                        field: field.name.clone(),
                                        expected: field_type.to_string(),
                                        found: raw.to_string(),
                                    },
                                )?,
                            ),
                            None => None,
                        };
                        let id = field.id.unwrap_or(position as u32);
                        Ok(FieldDesc {
                            container,
                            default,
                            ..FieldDesc::new(id, field.name, field_type)
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(BagConfig {
                    name: bag.name,
                    description: bag.description,
                    fields,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SchemaConfig { bags })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn bag(&self, name: &str) -> Option<&BagConfig> {
        self.bags.iter().find(|bag| bag.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use attribute_types::FieldId;
    use std::io::Write;

    const UNITS: &str = r#"
[[bags]]
name = "unit"
description = "Replicated unit state"

[[bags.fields]]
name = "health"
type = "int"
default = 100

[[bags.fields]]
name = "speed"
type = "f32"
default = 4.5

[[bags.fields]]
name = "buffs"
type = "name"
array = true
default = ["haste"]

[[bags]]
name = "player"

[[bags.fields]]
name = "nick"
type = "string"
id = 10
"#;

    #[test]
    fn test_parse_config() {
        let config = SchemaConfig::from_toml(UNITS).unwrap();
        assert_eq!(config.bags.len(), 2);

        let unit = config.bag("unit").unwrap();
        assert_eq!(unit.description.as_deref(), Some("Replicated unit state"));
        assert_eq!(unit.fields[0].field_type, FieldType::Int32);
        assert_eq!(unit.fields[0].default, Some(FieldValue::Int32(100)));
        assert_eq!(unit.fields[1].default, Some(FieldValue::Float(4.5)));
        assert_eq!(unit.fields[2].id, FieldId(2));
        assert_eq!(unit.fields[2].container, ContainerKind::Array);
        assert_eq!(
            unit.fields[2].default,
            Some(FieldValue::Array(vec![FieldValue::Name("haste".into())]))
        );

        assert_eq!(config.bag("player").unwrap().fields[0].id, FieldId(10));
    }

    #[test]
    fn test_bad_field_type() {
        let content = r#"
[[bags]]
name = "broken"

[[bags.fields]]
name = "x"
type = "quaternion"
"#;
        assert!(matches!(
            SchemaConfig::from_toml(content),
            Err(BagError::InvalidFieldType(_))
        ));
    }

    #[test]
    fn test_bad_default() {
        let content = r#"
[[bags]]
name = "broken"

[[bags.fields]]
name = "alive"
type = "bool"
default = "yes"
"#;
        assert!(matches!(
            SchemaConfig::from_toml(content),
            Err(BagError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            SchemaConfig::from_toml("[[bags]\nname ="),
            Err(BagError::Parse(_))
        ));
    }

    #[test]
    fn test_load_and_register_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(UNITS.as_bytes()).unwrap();

        let config = SchemaConfig::from_path(file.path()).unwrap();
        let mut registry = SchemaRegistry::new();
        let schemas = registry.register_config(&config).unwrap();
        assert_eq!(schemas.len(), 2);
        assert_eq!(registry.names(), vec!["player", "unit"]);

        let unit = registry.named("unit").unwrap();
        assert_eq!(unit.initial_values()[0], FieldValue::Int32(100));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SchemaConfig::from_path(dir.path().join("absent.toml")),
            Err(BagError::Io(_))
        ));
    }
}
