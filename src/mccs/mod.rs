//! VESA Monitor Command Control Set standardizes the meaning of DDC/CI VCP
//! feature codes, and allows a display to broadcast its capabilities to the
//! host.

pub mod capabilities;
pub mod features;

use std::fmt::{self, Display, Formatter};

/// Label tables in the style of the feature registry: one row per value the
/// capabilities grammar defines. Lookups fold case since displays emit these
/// labels in either; unknown labels are preserved verbatim by the callers.
static PROTOCOL_LABELS: &[(&str, Protocol)] = &[
    ("monitor", Protocol::Monitor),
    ("display", Protocol::Display),
];

static TECHNOLOGY_LABELS: &[(&str, DisplayTechnology)] = &[
    ("crt", DisplayTechnology::Crt),
    ("lcd", DisplayTechnology::Lcd),
    ("led", DisplayTechnology::Led),
];

fn value_of<T: Clone>(table: &[(&str, T)], label: &str) -> Option<T> {
    table
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(label))
        .map(|(_, value)| value.clone())
}

fn label_of<'t, T: PartialEq>(table: &'t [(&str, T)], value: &T) -> &'t str {
    table
        .iter()
        .find(|(_, known)| known == value)
        .map(|(label, _)| *label)
        .unwrap_or("unknown")
}

/// Display protocol class advertised in the `prot` capabilities entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// Standard monitor
    Monitor,
    /// Rarely seen outside of MCCS spec examples.
    Display,
    /// Unrecognized protocol class
    Unknown(String),
}

impl<'a> From<&'a str> for Protocol {
    fn from(s: &'a str) -> Self {
        value_of(PROTOCOL_LABELS, s).unwrap_or_else(|| Protocol::Unknown(s.into()))
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Protocol::Unknown(s) => f.write_str(s),
            known => f.write_str(label_of(PROTOCOL_LABELS, known)),
        }
    }
}

/// Display panel technology advertised in the `type` capabilities entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DisplayTechnology {
    /// Cathode Ray Tube display
    Crt,
    /// Liquid Crystal Display
    Lcd,
    /// Oled
    Led,
    /// Unrecognized display type
    Unknown(String),
}

impl<'a> From<&'a str> for DisplayTechnology {
    fn from(s: &'a str) -> Self {
        value_of(TECHNOLOGY_LABELS, s).unwrap_or_else(|| DisplayTechnology::Unknown(s.into()))
    }
}

impl Display for DisplayTechnology {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DisplayTechnology::Unknown(s) => f.write_str(s),
            known => f.write_str(label_of(TECHNOLOGY_LABELS, known)),
        }
    }
}

/// Monitor Command Control Set specification version code
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version {
    /// Major version number
    pub major: u8,
    /// Minor revision version
    pub minor: u8,
}

impl Version {
    /// MCCS 2.0, assumed when a display does not announce its version.
    pub const V2_0: Version = Version::new(2, 0);

    /// Create a new MCCS version from the specified version and revision.
    pub const fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An unrecognized entry in the capability string
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnknownTag {
    /// The name of the entry
    pub name: String,
    /// The data contained in the entry, usually an unparsed string.
    pub data: String,
}
