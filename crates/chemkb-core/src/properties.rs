//! Structured physical property lookup
//!
//! A small constant table of illustrative property values near ambient
//! conditions (25 °C, 1 atm), independent of the document pipeline.

use crate::{KbError, Result};

/// A tabulated property value with its SI unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyEntry {
    pub substance: &'static str,
    pub property: &'static str,
    pub value: f64,
    pub unit: &'static str,
}

const PROPERTY_TABLE: &[PropertyEntry] = &[
    PropertyEntry {
        substance: "water",
        property: "density",
        value: 1000.0,
        unit: "kg/m3",
    },
    PropertyEntry {
        substance: "water",
        property: "viscosity",
        value: 0.001,
        unit: "Pa.s",
    },
    PropertyEntry {
        substance: "water",
        property: "specific_heat",
        value: 4186.0,
        unit: "J/(kg.K)",
    },
    PropertyEntry {
        substance: "water",
        property: "thermal_conductivity",
        value: 0.598,
        unit: "W/(m.K)",
    },
    PropertyEntry {
        substance: "air",
        property: "density",
        value: 1.204,
        unit: "kg/m3",
    },
    PropertyEntry {
        substance: "air",
        property: "viscosity",
        value: 1.81e-5,
        unit: "Pa.s",
    },
];

/// Unit suffixes accepted after a property name (`density_kg_m3`)
const UNIT_SUFFIXES: &[(&str, &str)] = &[
    ("density", "_kg_m3"),
    ("viscosity", "_pa_s"),
    ("specific_heat", "_j_kg_k"),
    ("thermal_conductivity", "_w_m_k"),
];

fn canonical_property(property: &str) -> String {
    let normalized = property.trim().to_lowercase().replace([' ', '-'], "_");
    UNIT_SUFFIXES
        .iter()
        .find_map(|(name, suffix)| {
            normalized
                .strip_suffix(suffix)
                .filter(|stem| stem == name)
                .map(str::to_string)
        })
        .unwrap_or(normalized)
}

/// Look up a full table entry (value plus unit)
pub fn lookup_property(substance: &str, property: &str) -> Result<PropertyEntry> {
    let substance_key = substance.trim().to_lowercase();
    let property_key = canonical_property(property);

    PROPERTY_TABLE
        .iter()
        .find(|entry| entry.substance == substance_key && entry.property == property_key)
        .copied()
        .ok_or_else(|| KbError::UnknownProperty {
            substance: substance.to_string(),
            property: property.to_string(),
        })
}

/// Look up a numeric property value in SI units
pub fn get_property(substance: &str, property: &str) -> Result<f64> {
    lookup_property(substance, property).map(|entry| entry.value)
}
