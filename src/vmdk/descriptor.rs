//! The VMDK descriptor file: a three-section text manifest (header
//! key/value, extent descriptors, disk database key/value) that must
//! round-trip exactly.
//!
//! Grounded in the teacher's `vmdk.rs` regex-driven line parsing, but
//! reworked into the ordered-entry-list model the round-trip property
//! (spec.md §8, property 4) requires: every recognized line is appended to
//! one of three `Vec`s in the order it was read, instead of being folded
//! into typed struct fields.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether a `DescriptorEntry`'s value was wrapped in `"..."` in the
/// source text (and must be re-wrapped on emit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Plain,
    Quoted,
}

/// A single `KEY=VALUE` (or `KEY="VALUE"`) line from the header or disk
/// database section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub key: String,
    pub value: String,
    pub kind: EntryKind,
}

impl DescriptorEntry {
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        DescriptorEntry {
            key: key.into(),
            value: value.into(),
            kind: EntryKind::Plain,
        }
    }

    pub fn quoted(key: impl Into<String>, value: impl Into<String>) -> Self {
        DescriptorEntry {
            key: key.into(),
            value: value.into(),
            kind: EntryKind::Quoted,
        }
    }
}

impl fmt::Display for DescriptorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntryKind::Plain => write!(f, "{}={}", self.key, self.value),
            EntryKind::Quoted => write!(f, "{}=\"{}\"", self.key, self.value),
        }
    }
}

/// Access mode for an extent, recognized by an ordinal (case-sensitive)
/// prefix match against the start of a descriptor line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentAccess {
    Rw,
    RdOnly,
    NoAccess,
}

impl ExtentAccess {
    const fn token(self) -> &'static str {
        match self {
            ExtentAccess::Rw => "RW",
            ExtentAccess::RdOnly => "RDONLY",
            ExtentAccess::NoAccess => "NOACCESS",
        }
    }

    /// Returns the access mode if `line` starts with one of the three
    /// recognized tokens, ordinal (case-sensitive) comparison.
    fn match_prefix(line: &str) -> Option<Self> {
        for mode in [ExtentAccess::Rw, ExtentAccess::RdOnly, ExtentAccess::NoAccess] {
            if line.starts_with(mode.token()) {
                return Some(mode);
            }
        }
        None
    }
}

impl fmt::Display for ExtentAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One line of the extent description section.
///
/// Positional grammar: `ACCESS SIZE TYPE ["filename" [OFFSET]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentDescriptor {
    pub access: ExtentAccess,
    pub size_sectors: u64,
    pub extent_type: String,
    pub filename: Option<String>,
    pub offset: Option<u64>,
}

static EXTENT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(RW|RDONLY|NOACCESS)\s+(\d+)\s+(\S+)(?:\s+"([^"]*)")?(?:\s+(\d+))?\s*$"#)
        .unwrap()
});

impl FromStr for ExtentDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = EXTENT_LINE_REGEX
            .captures(s)
            .ok_or_else(|| Error::MalformedLine(s.to_string()))?;
        let access = match &caps[1] {
            "RW" => ExtentAccess::Rw,
            "RDONLY" => ExtentAccess::RdOnly,
            "NOACCESS" => ExtentAccess::NoAccess,
            _ => unreachable!("regex only matches the three tokens"),
        };
        let size_sectors = caps[2]
            .parse()
            .map_err(|_| Error::MalformedLine(s.to_string()))?;
        let extent_type = caps[3].to_string();
        let filename = caps.get(4).map(|m| m.as_str().to_string());
        let offset = caps
            .get(5)
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| Error::MalformedLine(s.to_string()))?;
        Ok(ExtentDescriptor {
            access,
            size_sectors,
            extent_type,
            filename,
            offset,
        })
    }
}

impl fmt::Display for ExtentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.access, self.size_sectors, self.extent_type)?;
        if let Some(ref filename) = self.filename {
            write!(f, " \"{}\"", filename)?;
            if let Some(offset) = self.offset {
                write!(f, " {}", offset)?;
            }
        }
        Ok(())
    }
}

/// `createType` closed token set. Parsed and emitted through `serde_json`
/// the same way the teacher's `VMDKDiskType`/`VMDKDiskAdapterType` map a
/// bare string token to an enum variant: wrap the token as a JSON string
/// and let `#[serde(rename = "...")]` do the matching, rather than a
/// hand-rolled match arm per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateType {
    #[serde(rename = "monolithicSparse")]
    MonolithicSparse,
    #[serde(rename = "vmfsSparse")]
    VmfsSparse,
    #[serde(rename = "monolithicFlat")]
    MonolithicFlat,
    #[serde(rename = "vmfs")]
    Vmfs,
    #[serde(rename = "twoGbMaxExtentSparse")]
    TwoGbMaxExtentSparse,
    #[serde(rename = "twoGbMaxExtentFlat")]
    TwoGbMaxExtentFlat,
    #[serde(rename = "fullDevice")]
    FullDevice,
    #[serde(rename = "vmfsRaw")]
    VmfsRaw,
    #[serde(rename = "partitionedDevice")]
    PartitionedDevice,
    #[serde(rename = "vmfsRawDeviceMap")]
    VmfsRawDeviceMap,
    #[serde(rename = "vmfsPassthroughRawDeviceMap")]
    VmfsPassthroughRawDeviceMap,
    #[serde(rename = "streamOptimized")]
    StreamOptimized,
}

impl CreateType {
    fn token(self) -> String {
        // Infallible: every variant serializes to a JSON string token.
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .expect("CreateType always serializes to a string")
    }

    fn parse(token: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(token.to_string())).map_err(|_| {
            Error::UnknownEnum {
                kind: "createType",
                token: token.to_string(),
            }
        })
    }
}

impl fmt::Display for CreateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// `ddb.adapterType` closed token set, parsed/emitted through
/// `serde_json` exactly like [`CreateType`] (and like the teacher's
/// `VMDKDiskAdapterType`, carried over rename-for-rename).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterType {
    #[serde(rename = "ide")]
    Ide,
    #[serde(rename = "buslogic")]
    BusLogic,
    #[serde(rename = "lsilogic")]
    LsiLogicScsi,
    #[serde(rename = "legacyESX")]
    LegacyEsx,
}

impl AdapterType {
    fn token(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .expect("AdapterType always serializes to a string")
    }

    fn parse(token: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(token.to_string())).map_err(|_| {
            Error::UnknownEnum {
                kind: "adapterType",
                token: token.to_string(),
            }
        })
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Formats 16 raw bytes as `"b0 b1 ... b7-b8 ... b15"`.
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", hex[..8].join(" "), hex[8..].join(" "))
}

/// Parses a UUID string accepting space or dash as the byte separator;
/// must yield exactly 16 hex byte tokens.
pub fn parse_uuid(s: &str) -> Result<[u8; 16]> {
    let tokens: Vec<&str> = s
        .split(|c| c == ' ' || c == '-')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() != 16 {
        return Err(Error::InvalidUuid(s.to_string()));
    }
    let mut bytes = [0u8; 16];
    for (i, tok) in tokens.iter().enumerate() {
        bytes[i] = u8::from_str_radix(tok, 16).map_err(|_| Error::InvalidUuid(s.to_string()))?;
    }
    Ok(bytes)
}

/// The full three-section descriptor file.
#[derive(Debug, Clone, Default)]
pub struct DescriptorFile {
    pub header: Vec<DescriptorEntry>,
    pub extents: Vec<ExtentDescriptor>,
    pub disk_database: Vec<DescriptorEntry>,
}

static KEY_VALUE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([A-Za-z0-9_.]+)\s*=\s*(.*)$"#).unwrap());

fn parse_key_value(line: &str) -> Result<(String, String, EntryKind)> {
    let caps = KEY_VALUE_REGEX
        .captures(line)
        .ok_or_else(|| Error::MalformedLine(line.to_string()))?;
    let key = caps[1].to_string();
    let raw_value = caps[2].trim();
    if raw_value.len() >= 2 && raw_value.starts_with('"') && raw_value.ends_with('"') {
        Ok((
            key,
            raw_value[1..raw_value.len() - 1].to_string(),
            EntryKind::Quoted,
        ))
    } else {
        Ok((key, raw_value.to_string(), EntryKind::Plain))
    }
}

impl DescriptorFile {
    /// An empty descriptor file with the documented defaults.
    pub fn new() -> Self {
        DescriptorFile {
            header: vec![
                DescriptorEntry::plain("version", "1"),
                DescriptorEntry::plain("CID", "ffffffff"),
                DescriptorEntry::plain("parentCID", "ffffffff"),
                DescriptorEntry::quoted("createType", ""),
            ],
            extents: Vec::new(),
            disk_database: vec![
                DescriptorEntry::quoted("ddb.adapterType", "lsilogic"),
                DescriptorEntry::quoted("ddb.geometry.sectors", ""),
                DescriptorEntry::quoted("ddb.geometry.heads", ""),
                DescriptorEntry::quoted("ddb.geometry.cylinders", ""),
            ],
        }
    }

    /// Parses the three-section grammar described in spec.md §4.2: trim
    /// trailing NULs, strip anything from `#` onward, skip blank lines,
    /// classify extent lines by ordinal prefix, and route every other
    /// `KEY=VALUE` line to the disk database (if `KEY` starts with `ddb.`)
    /// or the header.
    pub fn parse(text: &str) -> Result<Self> {
        let mut file = DescriptorFile {
            header: Vec::new(),
            extents: Vec::new(),
            disk_database: Vec::new(),
        };
        for raw_line in text.lines() {
            let no_nul = raw_line.trim_end_matches('\0');
            let stripped = match no_nul.find('#') {
                Some(idx) => &no_nul[..idx],
                None => no_nul,
            };
            let line = stripped.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(_access) = ExtentAccess::match_prefix(line) {
                file.extents.push(line.parse()?);
                continue;
            }
            let (key, value, kind) = parse_key_value(line)?;
            let entry = DescriptorEntry { key, value, kind };
            if entry.key.starts_with("ddb.") {
                file.disk_database.push(entry);
            } else {
                file.header.push(entry);
            }
        }
        Ok(file)
    }

    /// Emits the three sections in order, blank-line separated, `\n`
    /// terminated, ASCII only.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        out.push_str("# Disk DescriptorFile\n");
        for entry in &self.header {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str("# Extent description\n");
        for extent in &self.extents {
            out.push_str(&extent.to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str("# The Disk Data Base\n");
        out.push_str("#DDB\n");
        for entry in &self.disk_database {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    fn header_value(&self, key: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    fn ddb_value(&self, key: &str) -> Option<&str> {
        self.disk_database
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    fn set_header_value(&mut self, key: &str, value: String, kind: EntryKind) {
        if let Some(entry) = self.header.iter_mut().find(|e| e.key == key) {
            entry.value = value;
            entry.kind = kind;
        } else {
            self.header.push(DescriptorEntry { key: key.to_string(), value, kind });
        }
    }

    pub fn create_type(&self) -> Result<CreateType> {
        let token = self
            .header_value("createType")
            .ok_or_else(|| Error::NotFound("createType".to_string()))?;
        CreateType::parse(token)
    }

    pub fn set_create_type(&mut self, value: CreateType) {
        self.set_header_value("createType", value.token(), EntryKind::Quoted);
    }

    pub fn adapter_type(&self) -> Result<AdapterType> {
        let token = self
            .ddb_value("ddb.adapterType")
            .ok_or_else(|| Error::NotFound("ddb.adapterType".to_string()))?;
        AdapterType::parse(token)
    }

    /// 32-bit content id, stored as 8 lowercase hex digits.
    pub fn content_id(&self) -> Result<u32> {
        let token = self
            .header_value("CID")
            .ok_or_else(|| Error::NotFound("CID".to_string()))?;
        u32::from_str_radix(token, 16).map_err(|_| Error::MalformedLine(token.to_string()))
    }

    pub fn set_content_id(&mut self, value: u32) {
        self.set_header_value("CID", format!("{:08x}", value), EntryKind::Plain);
    }

    pub fn parent_content_id(&self) -> Result<u32> {
        let token = self
            .header_value("parentCID")
            .ok_or_else(|| Error::NotFound("parentCID".to_string()))?;
        u32::from_str_radix(token, 16).map_err(|_| Error::MalformedLine(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: &str = r#"# Disk DescriptorFile
version=1
CID=deadbeef
parentCID=ffffffff
createType="monolithicSparse"

# Extent description
RW 20480 SPARSE "disk-s001.vmdk"

# The Disk Data Base
#DDB
ddb.adapterType="lsilogic"
"#;

    #[test]
    fn s1_minimal_round_trip() {
        let descriptor = DescriptorFile::parse(S1).unwrap();
        assert_eq!(descriptor.content_id().unwrap(), 0xdead_beef);
        assert_eq!(descriptor.create_type().unwrap(), CreateType::MonolithicSparse);
        assert_eq!(descriptor.extents.len(), 1);
        let extent = &descriptor.extents[0];
        assert_eq!(extent.access, ExtentAccess::Rw);
        assert_eq!(extent.size_sectors, 20480);
        assert_eq!(extent.extent_type, "SPARSE");
        assert_eq!(extent.filename.as_deref(), Some("disk-s001.vmdk"));
        assert_eq!(descriptor.adapter_type().unwrap(), AdapterType::LsiLogicScsi);
    }

    #[test]
    fn s2_unknown_create_type_errors() {
        let text = S1.replace("monolithicSparse", "bogusType");
        let descriptor = DescriptorFile::parse(&text).unwrap();
        assert!(matches!(
            descriptor.create_type(),
            Err(Error::UnknownEnum { kind: "createType", .. })
        ));
    }

    #[test]
    fn s3_uuid_format_and_parse() {
        let bytes: [u8; 16] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ];
        let formatted = format_uuid(&bytes);
        assert_eq!(
            formatted,
            "01 02 03 04 05 06 07 08-09 0a 0b 0c 0d 0e 0f 10"
        );
        let dashed = "01-02-03-04-05-06-07-08-09-0a-0b-0c-0d-0e-0f-10";
        assert_eq!(parse_uuid(dashed).unwrap(), bytes);
        assert_eq!(parse_uuid(&formatted).unwrap(), bytes);
    }

    #[test]
    fn property_4_parse_emit_parse_round_trip() {
        let descriptor = DescriptorFile::parse(S1).unwrap();
        let emitted = descriptor.emit();
        let reparsed = DescriptorFile::parse(&emitted).unwrap();
        assert_eq!(descriptor.header, reparsed.header);
        assert_eq!(descriptor.extents, reparsed.extents);
        assert_eq!(descriptor.disk_database, reparsed.disk_database);
    }

    #[test]
    fn default_descriptor_matches_documented_defaults() {
        let descriptor = DescriptorFile::new();
        assert_eq!(descriptor.content_id().unwrap(), 0xffff_ffff);
        assert_eq!(descriptor.parent_content_id().unwrap(), 0xffff_ffff);
        assert_eq!(descriptor.adapter_type().unwrap(), AdapterType::LsiLogicScsi);
    }

    #[test]
    fn rejects_unrecognized_lines() {
        assert!(DescriptorFile::parse("not a valid line at all !!").is_err());
    }
}
