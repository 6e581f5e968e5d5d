//! MCCS compliant displays report their supported features in a
//! parenthesized capability string; this module parses it into structured
//! data.
//!
//! The engine delivers the raw string (see
//! [`MonitorDevice::capabilities_string`]); parsing is a separate concern
//! so callers can keep the raw form around.
//!
//! [`MonitorDevice::capabilities_string`]: crate::MonitorDevice::capabilities_string

use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{char, multispace0, u8 as dec_u8},
    combinator::{all_consuming, map_res, opt},
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated},
    Finish, IResult,
};

use super::{DisplayTechnology, Protocol, UnknownTag, Version};
use crate::ddc::{DdcError, ErrorKind};

/// One feature advertised in the `vcp(...)` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityFeature {
    pub code: u8,
    /// Discrete values listed for non-continuous features, if any.
    pub values: Option<Vec<u8>>,
}

/// Parsed display capabilities string.
#[derive(Debug, Default, Clone)]
pub struct Capabilities {
    pub protocol: Option<Protocol>,
    /// The display panel technology.
    pub technology: Option<DisplayTechnology>,
    /// The monitor model identifier.
    pub model: Option<String>,
    /// Supported DDC/CI command opcodes.
    pub commands: Vec<u8>,
    /// A value of `1` seems to indicate that the monitor has passed
    /// Microsoft's Windows Hardware Quality Labs testing.
    pub ms_whql: Option<u8>,
    pub mccs_version: Option<Version>,
    /// Advertised VCP features.
    pub vcp_features: Vec<CapabilityFeature>,
    /// Additional unrecognized entries, preserved verbatim.
    pub unknown_tags: Vec<UnknownTag>,
}

impl Capabilities {
    /// Whether the display advertises the feature code.
    pub fn has_feature(&self, code: u8) -> bool {
        self.vcp_features.iter().any(|f| f.code == code)
    }
}

/// Parses an MCCS capability string.
pub fn parse_capabilities(input: &str) -> Result<Capabilities, DdcError> {
    const OP: &str = "parse_capabilities";
    // displays pad the transferred string with NULs and blanks
    let input = input.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let (_, entries) = all_consuming(delimited(
        char('('),
        many0(entry),
        preceded(multispace0, char(')')),
    ))(input)
    .finish()
    .map_err(|_: nom::error::Error<&str>| DdcError::new(ErrorKind::InterpretationFailed, OP))?;

    let mut caps = Capabilities::default();
    for (tag, body) in entries {
        match tag {
            "prot" => caps.protocol = Some(body.trim().into()),
            "type" => caps.technology = Some(body.trim().into()),
            "model" => caps.model = Some(body.trim().to_string()),
            "cmds" => {
                caps.commands = hexbytes(body)
                    .ok_or_else(|| DdcError::new(ErrorKind::InterpretationFailed, OP))?
            }
            "mswhql" => {
                caps.ms_whql = Some(
                    body.trim()
                        .parse()
                        .map_err(|_| DdcError::new(ErrorKind::InterpretationFailed, OP))?,
                )
            }
            "mccs_ver" => {
                let (_, (major, minor)) =
                    all_consuming(separated_pair(dec_u8, char('.'), dec_u8))(body.trim())
                        .finish()
                        .map_err(|_: nom::error::Error<&str>| {
                            DdcError::new(ErrorKind::InterpretationFailed, OP)
                        })?;
                caps.mccs_version = Some(Version::new(major, minor));
            }
            "vcp" | "VCP" => {
                let (_, features) = all_consuming(terminated(many0(vcp_feature), multispace0))(
                    body,
                )
                .finish()
                .map_err(|_: nom::error::Error<&str>| {
                    DdcError::new(ErrorKind::InterpretationFailed, OP)
                })?;
                caps.vcp_features = features;
            }
            _ => caps.unknown_tags.push(UnknownTag {
                name: tag.to_string(),
                data: body.to_string(),
            }),
        }
    }
    Ok(caps)
}

/// One `tag(body)` entry; the body keeps nested groups unparsed.
fn entry(i: &str) -> IResult<&str, (&str, &str)> {
    let (i, _) = multispace0(i)?;
    let (i, tag) = take_while_m_n(1, 64, |c: char| c.is_ascii_alphanumeric() || c == '_')(i)?;
    let (i, _) = multispace0(i)?;
    let (i, body) = balanced(i)?;
    Ok((i, (tag, body)))
}

/// A parenthesized body with balanced nesting, returned without the outer
/// pair.
fn balanced(i: &str) -> IResult<&str, &str> {
    if !i.starts_with('(') {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Char,
        )));
    }
    let mut depth = 0usize;
    for (idx, c) in i.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&i[idx + 1..], &i[1..idx]));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        i,
        nom::error::ErrorKind::TakeUntil,
    )))
}

fn hex_u8(i: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s| u8::from_str_radix(s, 16),
    )(i)
}

fn vcp_feature(i: &str) -> IResult<&str, CapabilityFeature> {
    let (i, code) = preceded(multispace0, hex_u8)(i)?;
    let (i, values) = opt(preceded(
        multispace0,
        delimited(
            char('('),
            many0(preceded(multispace0, hex_u8)),
            preceded(multispace0, char(')')),
        ),
    ))(i)?;
    Ok((i, CapabilityFeature { code, values }))
}

fn hexbytes(body: &str) -> Option<Vec<u8>> {
    body.split_whitespace()
        .map(|t| u8::from_str_radix(t, 16).ok())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "(prot(monitor)type(lcd)model(U2720Q)cmds(01 02 03 07 0C E3 F3)\
         vcp(02 04 05 08 10 12 14(01 05 08) 16 18 1A 60(01 0F 11) DF)\
         mswhql(1)mccs_ver(2.1))";

    #[test]
    fn parses_full_sample() {
        let caps = parse_capabilities(SAMPLE).unwrap();
        assert_eq!(caps.protocol, Some(Protocol::Monitor));
        assert_eq!(caps.technology, Some(DisplayTechnology::Lcd));
        assert_eq!(caps.model.as_deref(), Some("U2720Q"));
        assert_eq!(caps.commands, vec![0x01, 0x02, 0x03, 0x07, 0x0c, 0xe3, 0xf3]);
        assert_eq!(caps.ms_whql, Some(1));
        assert_eq!(caps.mccs_version, Some(Version::new(2, 1)));
        assert!(caps.has_feature(0x10));
        assert!(!caps.has_feature(0x72));
        let input = caps.vcp_features.iter().find(|f| f.code == 0x60).unwrap();
        assert_eq!(input.values, Some(vec![0x01, 0x0f, 0x11]));
        let brightness = caps.vcp_features.iter().find(|f| f.code == 0x10).unwrap();
        assert_eq!(brightness.values, None);
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let caps = parse_capabilities("(prot(monitor)mpu(01)asset_eep(40))").unwrap();
        assert_eq!(caps.unknown_tags.len(), 2);
        assert_eq!(caps.unknown_tags[0].name, "mpu");
        assert_eq!(caps.unknown_tags[0].data, "01");
    }

    #[test]
    fn tolerates_wire_padding() {
        let padded = format!("{SAMPLE}\0\0   ");
        assert!(parse_capabilities(&padded).is_ok());
    }

    #[test]
    fn rejects_unbalanced_input() {
        let err = parse_capabilities("(prot(monitor").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InterpretationFailed);
        assert!(parse_capabilities("garbage").is_err());
    }
}
