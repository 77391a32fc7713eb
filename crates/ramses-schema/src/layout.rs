//! System layout documents.
//!
//! A layout describes an installation ahead of time: which controllers exist,
//! which sensors and actuators belong to which zone, the DHW circuit, and the
//! device filter lists. It is checked against an embedded JSON Schema before
//! being deserialized, then checked for consistency.
//!
//! ```json
//! {
//!   "systems": [{
//!     "controller": "01:145038",
//!     "zones": [{ "index": 0, "name": "Lounge", "sensor": "04:189076", "actuators": ["04:189076"] }],
//!     "dhw": { "sensor": "07:045960", "hotwater_valve": "13:081807" }
//!   }],
//!   "known_list": ["34:092243"]
//! }
//! ```

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use ramses_frame::Address;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::validator::{check_layout, validate_document};

const LAYOUT_SCHEMA: &str = include_str!("../schemas/system_layout.schema.json");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLayout {
    #[serde(default)]
    pub systems: Vec<SystemSpec>,
    /// Devices known to exist but not bound to any system.
    #[serde(default)]
    pub orphans: Vec<Address>,
    #[serde(default)]
    pub known_list: Vec<Address>,
    #[serde(default)]
    pub block_list: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSpec {
    pub controller: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appliance_control: Option<Address>,
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhw: Option<DhwSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub index: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<Address>,
    #[serde(default)]
    pub actuators: Vec<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhwSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotwater_valve: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heating_valve: Option<Address>,
}

impl DhwSpec {
    pub fn devices(&self) -> impl Iterator<Item = Address> + '_ {
        [self.sensor, self.hotwater_valve, self.heating_valve]
            .into_iter()
            .flatten()
    }
}

impl SystemLayout {
    /// Every address the layout mentions, block list excluded.
    pub fn devices(&self) -> BTreeSet<Address> {
        let mut devices = BTreeSet::new();
        for system in &self.systems {
            devices.insert(system.controller);
            devices.extend(system.appliance_control);
            for zone in &system.zones {
                devices.extend(zone.sensor);
                devices.extend(zone.actuators.iter().copied());
            }
            if let Some(dhw) = &system.dhw {
                devices.extend(dhw.devices());
            }
        }
        devices.extend(self.orphans.iter().copied());
        devices.extend(self.known_list.iter().copied());
        devices
    }
}

/// Compiled layout schema plus the limits it is applied with.
pub struct LayoutLoader {
    validator: Validator,
    config: RegistryConfig,
}

impl LayoutLoader {
    pub fn new() -> Result<Self> {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        let mut schema: Value = serde_json::from_str(LAYOUT_SCHEMA)?;
        if config.strict_mode {
            apply_strict_mode(&mut schema);
        }
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;
        Ok(Self { validator, config })
    }

    /// Parse and validate a layout from a JSON string.
    pub fn parse_str(&self, text: &str) -> Result<SystemLayout> {
        let document: Value = serde_json::from_str(text)?;
        self.parse_value(document)
    }

    /// Validate and deserialize an already parsed JSON document.
    pub fn parse_value(&self, document: Value) -> Result<SystemLayout> {
        validate_document(&document, &self.validator)?;
        let layout: SystemLayout = serde_json::from_value(document)?;
        check_layout(&layout, self.config.max_zones)?;
        Ok(layout)
    }

    /// Load a layout file, refusing files above the configured size.
    pub fn load(&self, path: &Path) -> Result<SystemLayout> {
        let file = std::fs::File::open(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
        let max_bytes = self.config.max_layout_file_size;
        let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);

        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
        if content.len() > max_bytes {
            return Err(SchemaError::LoadFailed(format!(
                "layout file too large (over {max_bytes} bytes): {}",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), bytes = content.len(), "loading system layout");
        self.parse_str(&content)
    }
}

/// Close every object schema against properties it does not declare.
fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if declares_properties(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for key in ["properties", "$defs"] {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(apply_strict_mode);
                }
            }
            if let Some(items) = map.get_mut("items") {
                apply_strict_mode(items);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(apply_strict_mode),
        _ => {}
    }
}

fn declares_properties(map: &Map<String, Value>) -> bool {
    matches!(map.get("type"), Some(Value::String(kind)) if kind == "object")
        || map.contains_key("properties")
}
