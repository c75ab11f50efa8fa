// Circuit descriptions - serialisable snapshots of a declared graph

//! # Circuit Description
//!
//! A [`CircuitDescription`] is a read-only projection of what has been *declared*
//! on a circuit (gadgets, wires, feeds, labels). It carries no behaviour and knows
//! nothing about live channels; external tooling uses it to persist or display a
//! circuit, and the `flow` binary uses it to rebuild one.
//!
//! Empty sections are left out of the JSON form:
//!
//! ```json
//! {
//!   "gadgets": [{ "name": "r", "type": "Repeater" }],
//!   "feeds": [{ "to": "r.Num", "data": 3 }],
//!   "labels": { "MyIn": "r.In", "MyOut": "r.Out" }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of a circuit's declarations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitDescription {
    /// Gadgets created from the registry, in the order they were added
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gadgets: Vec<GadgetEntry>,

    /// Names of gadgets added as ready-made instances (nested circuits, closures)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unregistered: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wires: Vec<WireEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<FeedEntry>,

    /// External boundary name -> internal pin
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadgetEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub to: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl CircuitDescription {
    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
            && self.unregistered.is_empty()
            && self.wires.is_empty()
            && self.feeds.is_empty()
            && self.labels.is_empty()
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
