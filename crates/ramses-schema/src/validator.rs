use std::collections::HashMap;

use jsonschema::Validator;
use ramses_frame::Address;
use serde_json::Value;

use crate::device::DeviceType;
use crate::error::{Result, SchemaError};
use crate::layout::SystemLayout;

const MAX_REPORTED: usize = 4;

/// Structural check of a layout document against the compiled layout schema.
pub(crate) fn validate_document(document: &Value, validator: &Validator) -> Result<()> {
    let messages: Vec<String> = validator
        .iter_errors(document)
        .take(MAX_REPORTED)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(SchemaError::ValidationFailed {
        message: messages.join("; "),
    })
}

/// Consistency checks the schema cannot express.
pub(crate) fn check_layout(layout: &SystemLayout, max_zones: u8) -> Result<()> {
    let mut owners: HashMap<Address, String> = HashMap::new();
    let mut claim = |device: Address, owner: String| -> Result<()> {
        match owners.get(&device) {
            Some(existing) if *existing != owner => Err(invalid(format!(
                "{device} is listed under both {existing} and {owner}"
            ))),
            _ => {
                owners.insert(device, owner);
                Ok(())
            }
        }
    };

    for system in &layout.systems {
        let ctl = system.controller;
        if !DeviceType::of(&ctl).is_controller() {
            return Err(invalid(format!("{ctl} is not a controller")));
        }
        claim(ctl, format!("system {ctl}"))?;

        let mut seen = Vec::new();
        for zone in &system.zones {
            if zone.index >= max_zones {
                return Err(invalid(format!(
                    "zone index {:02X} of {ctl} exceeds the zone limit",
                    zone.index
                )));
            }
            if seen.contains(&zone.index) {
                return Err(invalid(format!(
                    "zone {:02X} of {ctl} is listed twice",
                    zone.index
                )));
            }
            seen.push(zone.index);

            let owner = format!("zone {ctl}/{:02X}", zone.index);
            for device in zone.sensor.iter().chain(&zone.actuators) {
                claim(*device, owner.clone())?;
            }
        }
        if let Some(dhw) = &system.dhw {
            for device in dhw.devices() {
                claim(device, format!("dhw {ctl}"))?;
            }
        }
    }

    if let Some(blocked) = layout
        .block_list
        .iter()
        .find(|addr| layout.known_list.contains(addr))
    {
        return Err(invalid(format!(
            "{blocked} is on both the known list and the block list"
        )));
    }
    Ok(())
}

fn invalid(message: String) -> SchemaError {
    SchemaError::ValidationFailed { message }
}
