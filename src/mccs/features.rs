//! Static registry of standard MCCS VCP feature codes.
//!
//! The engine consults this table to decide how a feature is accessed:
//! whether it can be read or written at a given MCCS version, whether its
//! value travels as a non-table pair or as a table byte string, and which
//! scan subsets it belongs to.

use super::Version;
use crate::vcp::ValueKind;

const READ: u16 = 0x0001;
const WRITE: u16 = 0x0002;
const CONT: u16 = 0x0004;
const NONCONT: u16 = 0x0008;
const TABLE: u16 = 0x0010;
const PROFILE: u16 = 0x0020;
const COLOR: u16 = 0x0040;

const RW: u16 = READ | WRITE;

/// One entry of the feature registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feature {
    pub code: u8,
    pub name: &'static str,
    flags: u16,
    /// First MCCS version defining the code.
    since: Version,
    /// Flag override effective from MCCS 3.0 on, for codes that changed
    /// their type (gamma became a table feature).
    v3_flags: Option<u16>,
}

const fn feature(code: u8, name: &'static str, flags: u16) -> Feature {
    Feature {
        code,
        name,
        flags,
        since: Version::V2_0,
        v3_flags: None,
    }
}

impl Feature {
    fn flags_for(&self, version: Version) -> u16 {
        if version >= Version::new(3, 0) {
            self.v3_flags.unwrap_or(self.flags)
        } else {
            self.flags
        }
    }

    pub fn is_readable(&self, version: Version) -> bool {
        version >= self.since && self.flags_for(version) & READ != 0
    }

    pub fn is_writable(&self, version: Version) -> bool {
        version >= self.since && self.flags_for(version) & WRITE != 0
    }

    pub fn is_table(&self, version: Version) -> bool {
        self.flags_for(version) & TABLE != 0
    }

    /// The wire kind of this feature's value at `version`.
    pub fn kind(&self, version: Version) -> ValueKind {
        if self.is_table(version) {
            ValueKind::Table
        } else {
            ValueKind::NonTable
        }
    }

    pub fn is_continuous(&self, version: Version) -> bool {
        self.flags_for(version) & CONT != 0
    }
}

/// Feature groups referenced by scans and by the profile dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSubset {
    /// Every code the registry knows.
    All,
    /// Codes the registry considers present at the given version; live
    /// probing refines this further.
    Supported,
    /// Codes a full scan probes, identical to `All` at registry level.
    Scan,
    /// The color-profile codes dump/load operates on.
    Profile,
    /// Color management codes.
    ColorMgmt,
    SingleFeature(u8),
}

static FEATURES: &[Feature] = &[
    feature(0x02, "New control value", RW | NONCONT),
    feature(0x03, "Soft controls", RW | NONCONT),
    feature(0x04, "Restore factory defaults", WRITE | NONCONT),
    feature(0x05, "Restore factory brightness/contrast", WRITE | NONCONT),
    feature(0x06, "Restore factory geometry defaults", WRITE | NONCONT),
    feature(0x08, "Restore color defaults", WRITE | NONCONT),
    feature(0x0b, "Color temperature increment", READ | NONCONT | COLOR),
    feature(0x0c, "Color temperature request", RW | CONT | COLOR),
    feature(0x0e, "Clock", RW | CONT),
    feature(0x10, "Brightness", RW | CONT | PROFILE | COLOR),
    feature(0x12, "Contrast", RW | CONT | PROFILE | COLOR),
    feature(0x14, "Select color preset", RW | NONCONT | PROFILE | COLOR),
    feature(0x16, "Video gain: Red", RW | CONT | PROFILE | COLOR),
    feature(0x18, "Video gain: Green", RW | CONT | PROFILE | COLOR),
    feature(0x1a, "Video gain: Blue", RW | CONT | PROFILE | COLOR),
    feature(0x1e, "Auto setup", RW | NONCONT),
    feature(0x20, "Horizontal position", RW | CONT),
    feature(0x30, "Vertical position", RW | CONT),
    feature(0x3e, "Clock phase", RW | CONT),
    feature(0x52, "Active control", READ | NONCONT),
    feature(0x59, "Six axis saturation: Red", RW | CONT | COLOR),
    feature(0x5a, "Six axis saturation: Yellow", RW | CONT | COLOR),
    feature(0x5b, "Six axis saturation: Green", RW | CONT | COLOR),
    feature(0x5c, "Six axis saturation: Cyan", RW | CONT | COLOR),
    feature(0x5d, "Six axis saturation: Blue", RW | CONT | COLOR),
    feature(0x5e, "Six axis saturation: Magenta", RW | CONT | COLOR),
    feature(0x60, "Input source", RW | NONCONT),
    feature(0x62, "Audio speaker volume", RW | CONT),
    feature(0x6c, "Video black level: Red", RW | CONT | PROFILE | COLOR),
    feature(0x6e, "Video black level: Green", RW | CONT | PROFILE | COLOR),
    feature(0x70, "Video black level: Blue", RW | CONT | PROFILE | COLOR),
    Feature {
        code: 0x72,
        name: "Gamma",
        flags: RW | NONCONT | COLOR,
        since: Version::V2_0,
        v3_flags: Some(RW | TABLE | COLOR),
    },
    feature(0x73, "LUT size", READ | TABLE),
    feature(0x74, "Single point LUT operation", RW | TABLE | COLOR),
    feature(0x75, "Block LUT operation", RW | TABLE | COLOR),
    feature(0x7c, "Adjust zoom", RW | CONT),
    feature(0x87, "Sharpness", RW | CONT),
    feature(0x8d, "Audio mute", RW | NONCONT),
    feature(0x90, "Hue", RW | CONT | COLOR),
    feature(0xac, "Horizontal frequency", READ | CONT),
    feature(0xae, "Vertical frequency", READ | CONT),
    feature(0xb0, "Settings", WRITE | NONCONT),
    feature(0xb2, "Flat panel sub-pixel layout", READ | NONCONT),
    feature(0xb6, "Display technology type", READ | NONCONT),
    feature(0xc0, "Display usage time", READ | CONT),
    feature(0xc6, "Application enable key", READ | NONCONT),
    feature(0xc8, "Display controller type", READ | NONCONT),
    feature(0xc9, "Display firmware level", READ | CONT),
    feature(0xca, "OSD", RW | NONCONT),
    feature(0xcc, "OSD language", RW | NONCONT),
    feature(0xd6, "Power mode", RW | NONCONT),
    feature(0xda, "Scan mode", RW | NONCONT),
    feature(0xdc, "Display application", RW | NONCONT),
    feature(0xdf, "VCP version", READ | NONCONT),
];

pub fn find_by_code(code: u8) -> Option<&'static Feature> {
    FEATURES.iter().find(|f| f.code == code)
}

/// Members of a feature subset at the given MCCS version.
pub fn subset_members(subset: FeatureSubset, version: Version) -> Vec<&'static Feature> {
    match subset {
        FeatureSubset::All | FeatureSubset::Scan => FEATURES.iter().collect(),
        FeatureSubset::Supported => FEATURES.iter().filter(|f| version >= f.since).collect(),
        FeatureSubset::Profile => FEATURES
            .iter()
            .filter(|f| version >= f.since && f.flags_for(version) & PROFILE != 0)
            .collect(),
        FeatureSubset::ColorMgmt => FEATURES
            .iter()
            .filter(|f| version >= f.since && f.flags_for(version) & COLOR != 0)
            .collect(),
        FeatureSubset::SingleFeature(code) => find_by_code(code).into_iter().collect(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_by_code() {
        let brightness = find_by_code(0x10).unwrap();
        assert_eq!(brightness.name, "Brightness");
        assert!(brightness.is_readable(Version::V2_0));
        assert!(brightness.is_writable(Version::V2_0));
        assert!(!brightness.is_table(Version::V2_0));
        assert!(find_by_code(0xfe).is_none());
    }

    #[test]
    fn write_only_features_are_not_readable() {
        let restore = find_by_code(0x04).unwrap();
        assert!(!restore.is_readable(Version::V2_0));
        assert!(restore.is_writable(Version::V2_0));
    }

    #[test]
    fn gamma_becomes_table_at_v3() {
        let gamma = find_by_code(0x72).unwrap();
        assert!(!gamma.is_table(Version::new(2, 2)));
        assert!(gamma.is_table(Version::new(3, 0)));
        assert_eq!(gamma.kind(Version::V2_0), crate::vcp::ValueKind::NonTable);
        assert_eq!(
            gamma.kind(Version::new(3, 0)),
            crate::vcp::ValueKind::Table
        );
    }

    #[test]
    fn profile_subset_is_the_color_profile_codes() {
        let codes: Vec<u8> = subset_members(FeatureSubset::Profile, Version::V2_0)
            .iter()
            .map(|f| f.code)
            .collect();
        assert_eq!(
            codes,
            vec![0x10, 0x12, 0x14, 0x16, 0x18, 0x1a, 0x6c, 0x6e, 0x70]
        );
    }

    #[test]
    fn single_feature_subset() {
        let members = subset_members(FeatureSubset::SingleFeature(0x60), Version::V2_0);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].code, 0x60);
        assert!(subset_members(FeatureSubset::SingleFeature(0xfe), Version::V2_0).is_empty());
    }
}
