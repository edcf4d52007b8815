//! The closed set of device types recognized by the framework
//!
//! Device types classify nodes (switch, light, sensor, ...) and individual
//! URIs (the function a resource performs). The numeric tags are part of the
//! wire format: they appear in canonical device names and in resource-catalog
//! records, so the values are fixed.

use serde::{Deserialize, Serialize};

/// Numeric tag terminating a serialized rule list.
pub const TAG_END_OF_RULES: u8 = DeviceType::COUNT;

/// Numeric tag meaning "no rules, accept everything" in a serialized rule
/// list. Deliberately one past the device-type set.
pub const TAG_NO_RULES: u8 = DeviceType::COUNT + 1;

/// Device classification used in canonical names, catalog records, and
/// pairing rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceType {
    #[default]
    None = 0,
    ControlPanel = 1,
    Switch = 2,
    Lighting = 3,
    LightingOnOff = 4,
    LightingDimm = 5,
    LightingRgb = 6,
    Thermostat = 7,
    ThermostatSetTemp = 8,
    ThermostatReadSetTemp = 9,
    ThermostatReadCurrentTemp = 10,
    Sensor = 11,
    DoorLock = 12,
    MotionDetector = 13,
    RemoteControl = 14,
    EnergyMeter = 15,
    SmartPlug = 16,
    EnvironmentSensor = 17,
    DoorSensor = 18,
    Alarm = 19,
}

impl DeviceType {
    /// Number of defined device types; also the `END` sentinel tag.
    pub const COUNT: u8 = 20;

    /// Decode a numeric tag. Returns `None` for tags outside the closed set.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let ty = match tag {
            0 => DeviceType::None,
            1 => DeviceType::ControlPanel,
            2 => DeviceType::Switch,
            3 => DeviceType::Lighting,
            4 => DeviceType::LightingOnOff,
            5 => DeviceType::LightingDimm,
            6 => DeviceType::LightingRgb,
            7 => DeviceType::Thermostat,
            8 => DeviceType::ThermostatSetTemp,
            9 => DeviceType::ThermostatReadSetTemp,
            10 => DeviceType::ThermostatReadCurrentTemp,
            11 => DeviceType::Sensor,
            12 => DeviceType::DoorLock,
            13 => DeviceType::MotionDetector,
            14 => DeviceType::RemoteControl,
            15 => DeviceType::EnergyMeter,
            16 => DeviceType::SmartPlug,
            17 => DeviceType::EnvironmentSensor,
            18 => DeviceType::DoorSensor,
            19 => DeviceType::Alarm,
            _ => return None,
        };
        Some(ty)
    }

    /// The numeric tag used in names and on the wire.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::None => "none",
            DeviceType::ControlPanel => "control_panel",
            DeviceType::Switch => "switch",
            DeviceType::Lighting => "lighting",
            DeviceType::LightingOnOff => "lighting_on_off",
            DeviceType::LightingDimm => "lighting_dimm",
            DeviceType::LightingRgb => "lighting_rgb",
            DeviceType::Thermostat => "thermostat",
            DeviceType::ThermostatSetTemp => "thermostat_set_temp",
            DeviceType::ThermostatReadSetTemp => "thermostat_read_set_temp",
            DeviceType::ThermostatReadCurrentTemp => "thermostat_read_current_temp",
            DeviceType::Sensor => "sensor",
            DeviceType::DoorLock => "door_lock",
            DeviceType::MotionDetector => "motion_detector",
            DeviceType::RemoteControl => "remote_control",
            DeviceType::EnergyMeter => "energy_meter",
            DeviceType::SmartPlug => "smart_plug",
            DeviceType::EnvironmentSensor => "environment_sensor",
            DeviceType::DoorSensor => "door_sensor",
            DeviceType::Alarm => "alarm",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in 0..DeviceType::COUNT {
            let ty = DeviceType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
    }

    #[test]
    fn test_out_of_range_tags() {
        assert_eq!(DeviceType::from_tag(DeviceType::COUNT), None);
        assert_eq!(DeviceType::from_tag(TAG_NO_RULES), None);
        assert_eq!(DeviceType::from_tag(255), None);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(TAG_END_OF_RULES, 20);
        assert_eq!(TAG_NO_RULES, 21);
        assert_eq!(DeviceType::Switch.tag(), 2);
        assert_eq!(DeviceType::LightingOnOff.tag(), 4);
    }
}
