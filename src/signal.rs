use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Discretised signal phase as seen by a learning driver.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Phase {
    Green,
    Amber,
    Red,
}

impl Phase {
    /// Classifies the full per-lane state string of a signal (e.g. `"rrGGyy"`).
    ///
    /// Any green lane makes the phase green, otherwise any yellow lane makes it
    /// amber, otherwise it is red.
    pub fn from_signal_state(raw: &str) -> Phase {
        let raw = raw.to_ascii_lowercase();
        if raw.contains('g') {
            Phase::Green
        } else if raw.contains('y') {
            Phase::Amber
        } else {
            Phase::Red
        }
    }
}

/// Colour of the single link a vehicle is approaching, used by telemetry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum SignalColor {
    Green,
    Amber,
    Red,
}

impl SignalColor {
    /// Yellow takes precedence over red; anything else counts as green.
    pub fn from_link_state(raw: &str) -> SignalColor {
        let raw = raw.to_ascii_lowercase();
        if raw.contains('y') {
            SignalColor::Amber
        } else if raw.contains('r') {
            SignalColor::Red
        } else {
            SignalColor::Green
        }
    }
}

impl From<SignalColor> for Phase {
    fn from(color: SignalColor) -> Self {
        match color {
            SignalColor::Green => Phase::Green,
            SignalColor::Amber => Phase::Amber,
            SignalColor::Red => Phase::Red,
        }
    }
}

/// An upcoming signal on a vehicle's route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAhead {
    pub id: String,
    pub link_index: usize,
    /// Distance to the stop line.
    pub distance: f64,
    /// Raw state character(s) of the link the vehicle will use.
    pub link_state: String,
}
