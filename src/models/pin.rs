// Pin names and pin descriptors - the addressing scheme of a circuit
//
// ## Addressing Overview
//
// Every connection point in a circuit is addressed by a **pin name**:
//
// - `gadget.Pin` names pin `Pin` of the contained gadget `gadget`
// - `Pin` (no dot) names one of the circuit's own boundary pins, i.e. a label
//
// Only the first dot separates the gadget from the pin, so gadget names may not
// contain dots, while nothing stops a pin name from being unusual.
//
// ```
//     [p1] p1.Out ---> g.In [g: In -> g1.In ... g2.Out -> Out] g.Out ---> p2.In [p2]
// ```
//
// Gadgets describe their pins programmatically with [`PinSpec`]s instead of
// having the engine discover them through introspection.

use serde::{Deserialize, Serialize};

/// Separator between the gadget part and the pin part of a qualified name
pub const QUALIFIER: char = '.';

/// **Pin name** - either `gadget.pin` or a bare boundary pin name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinName(pub String);

impl PinName {
    pub fn new<S: Into<String>>(name: S) -> Self {
        PinName(name.into())
    }

    /// Build `gadget.pin`
    ///
    /// ```rust
    /// # use circuit_flow::PinName;
    /// assert_eq!(PinName::qualified("u", "In").as_str(), "u.In");
    /// ```
    pub fn qualified(gadget: &str, pin: &str) -> Self {
        PinName(format!("{}{}{}", gadget, QUALIFIER, pin))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(gadget, pin)`; `None` for a bare boundary name
    ///
    /// ```rust
    /// # use circuit_flow::PinName;
    /// assert_eq!(PinName::from("r.In").split(), Some(("r", "In")));
    /// assert_eq!(PinName::from("MyIn").split(), None);
    /// ```
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once(QUALIFIER)
    }

    pub fn is_qualified(&self) -> bool {
        self.0.contains(QUALIFIER)
    }

    /// The gadget part, `a` from `a.b`
    pub fn gadget(&self) -> Option<&str> {
        self.split().map(|(g, _)| g)
    }

    /// The pin part, `b` from `a.b`, or the whole name when unqualified
    pub fn pin(&self) -> &str {
        self.split().map_or(self.0.as_str(), |(_, p)| p)
    }
}

impl From<&str> for PinName {
    fn from(s: &str) -> Self {
        PinName(s.to_string())
    }
}

impl From<String> for PinName {
    fn from(s: String) -> Self {
        PinName(s)
    }
}

impl From<&String> for PinName {
    fn from(s: &String) -> Self {
        PinName(s.clone())
    }
}

impl std::fmt::Display for PinName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way messages flow through a pin, seen from the gadget that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Declaration of one pin a gadget exposes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinSpec {
    pub name: String,
    pub direction: Direction,
}

impl PinSpec {
    pub fn input<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Input,
        }
    }

    pub fn output<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
        }
    }
}
