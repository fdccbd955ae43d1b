//! `AttributeKind`: a tagged union over the closed set of structured
//! attribute payloads, selected by `AttributeType`. Parsing strategies
//! are data here, not a class per attribute type: `AttributeKind::parse`
//! is the single dispatcher, and each payload is a plain struct.

use crate::byteio::ByteReader;
use crate::error::Result;

use super::record::AttributeType;
use super::types::FileRecordReference;

#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_change_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
}

#[derive(Debug, Clone)]
pub struct FileName {
    pub parent: FileRecordReference,
    pub creation_time: u64,
    pub modification_time: u64,
    pub allocated_size: u64,
    pub real_size: u64,
    pub file_attributes: u32,
    pub namespace: u8,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SecurityDescriptor {
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct VolumeName {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct VolumeInformation {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u16,
}

#[derive(Debug, Clone)]
pub struct ObjectId {
    pub object_id: [u8; 16],
    pub birth_volume_id: Option<[u8; 16]>,
    pub birth_object_id: Option<[u8; 16]>,
    pub domain_id: Option<[u8; 16]>,
}

#[derive(Debug, Clone)]
pub struct ReparsePoint {
    pub tag: u32,
    pub data: Vec<u8>,
}

/// One `$ATTRIBUTE_LIST` entry: where to find an extent of some other
/// attribute that did not fit in this MFT record.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attribute_type: AttributeType,
    pub name: Option<String>,
    pub starting_vcn: u64,
    pub base_file_record: FileRecordReference,
    pub attribute_id: u16,
}

#[derive(Debug, Clone)]
pub struct AttributeList {
    pub entries: Vec<AttributeListEntry>,
}

/// A structured parse of an attribute's payload, or `Raw` for attribute
/// types this crate does not interpret further (`$DATA`, `$BITMAP`,
/// `$INDEX_ROOT`, `$INDEX_ALLOCATION`, and anything not in the closed set
/// above).
#[derive(Debug, Clone)]
pub enum AttributeKind {
    StandardInformation(StandardInformation),
    FileName(FileName),
    SecurityDescriptor(SecurityDescriptor),
    VolumeName(VolumeName),
    VolumeInformation(VolumeInformation),
    ObjectId(ObjectId),
    ReparsePoint(ReparsePoint),
    AttributeList(AttributeList),
    Raw,
}

impl AttributeKind {
    /// Dispatches on `attribute_type` and parses `payload` (the resident
    /// data, or the reassembled non-resident byte buffer for
    /// `$ATTRIBUTE_LIST`, which is the only typed attribute commonly
    /// stored non-resident).
    pub fn parse(attribute_type: AttributeType, payload: &[u8]) -> Result<AttributeKind> {
        Ok(match attribute_type {
            AttributeType::StandardInformation => {
                AttributeKind::StandardInformation(parse_standard_information(payload)?)
            }
            AttributeType::FileName => AttributeKind::FileName(parse_file_name(payload)?),
            AttributeType::SecurityDescriptor => AttributeKind::SecurityDescriptor(SecurityDescriptor {
                raw: payload.to_vec(),
            }),
            AttributeType::VolumeName => AttributeKind::VolumeName(parse_volume_name(payload)?),
            AttributeType::VolumeInformation => {
                AttributeKind::VolumeInformation(parse_volume_information(payload)?)
            }
            AttributeType::ObjectId => AttributeKind::ObjectId(parse_object_id(payload)?),
            AttributeType::ReparsePoint => AttributeKind::ReparsePoint(parse_reparse_point(payload)?),
            AttributeType::AttributeList => AttributeKind::AttributeList(parse_attribute_list(payload)?),
            _ => AttributeKind::Raw,
        })
    }
}

fn parse_standard_information(data: &[u8]) -> Result<StandardInformation> {
    let mut r = ByteReader::new(data);
    Ok(StandardInformation {
        creation_time: r.read_u64_le()?,
        modification_time: r.read_u64_le()?,
        mft_change_time: r.read_u64_le()?,
        access_time: r.read_u64_le()?,
        file_attributes: r.read_u32_le()?,
    })
}

fn parse_file_name(data: &[u8]) -> Result<FileName> {
    let mut r = ByteReader::new(data);
    // The parent reference is a single 8-byte field: low 48 bits are the
    // segment number, high 16 bits the sequence number.
    let parent_ref_raw = r.read_u64_le()?;
    let parent = FileRecordReference::new(parent_ref_raw & 0x0000_FFFF_FFFF_FFFF, (parent_ref_raw >> 48) as u16);
    let creation_time = r.read_u64_le()?;
    let modification_time = r.read_u64_le()?;
    let _mft_change_time = r.read_u64_le()?;
    let _access_time = r.read_u64_le()?;
    let allocated_size = r.read_u64_le()?;
    let real_size = r.read_u64_le()?;
    let file_attributes = r.read_u32_le()?;
    r.skip(4); // reparse tag / EA size union
    let name_length = r.read_u8()? as usize;
    let namespace = r.read_u8()?;
    let name = r.read_utf16_le(name_length)?;
    Ok(FileName {
        parent,
        creation_time,
        modification_time,
        allocated_size,
        real_size,
        file_attributes,
        namespace,
        name,
    })
}

fn parse_volume_name(data: &[u8]) -> Result<VolumeName> {
    let mut r = ByteReader::new(data);
    let name = r.read_utf16_le(data.len() / 2)?;
    Ok(VolumeName { name })
}

fn parse_volume_information(data: &[u8]) -> Result<VolumeInformation> {
    let mut r = ByteReader::new(data);
    r.skip(8); // reserved
    let major_version = r.read_u8()?;
    let minor_version = r.read_u8()?;
    let flags = r.read_u16_le()?;
    Ok(VolumeInformation {
        major_version,
        minor_version,
        flags,
    })
}

fn parse_object_id(data: &[u8]) -> Result<ObjectId> {
    let mut r = ByteReader::new(data);
    let mut read_guid = |r: &mut ByteReader| -> Result<[u8; 16]> {
        let bytes = r.read_bytes(16)?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(bytes);
        Ok(guid)
    };
    let object_id = read_guid(&mut r)?;
    let birth_volume_id = read_guid(&mut r).ok();
    let birth_object_id = read_guid(&mut r).ok();
    let domain_id = read_guid(&mut r).ok();
    Ok(ObjectId {
        object_id,
        birth_volume_id,
        birth_object_id,
        domain_id,
    })
}

fn parse_reparse_point(data: &[u8]) -> Result<ReparsePoint> {
    let mut r = ByteReader::new(data);
    let tag = r.read_u32_le()?;
    let data_length = r.read_u16_le()? as usize;
    r.skip(2); // reserved
    let payload = r.read_bytes(data_length)?;
    Ok(ReparsePoint {
        tag,
        data: payload.to_vec(),
    })
}

fn parse_attribute_list(data: &[u8]) -> Result<AttributeList> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let mut r = ByteReader::new(&data[pos..]);
        let type_code = r.read_u32_le()?;
        let record_length = r.read_u16_le()? as usize;
        if record_length == 0 {
            break;
        }
        let name_length = r.read_u8()? as usize;
        let _name_offset = r.read_u8()?;
        let starting_vcn = r.read_u64_le()?;
        let file_ref_raw = r.read_u64_le()?;
        let attribute_id = r.read_u16_le()?;
        let name = if name_length > 0 {
            Some(r.read_utf16_le(name_length)?)
        } else {
            None
        };
        entries.push(AttributeListEntry {
            attribute_type: AttributeType::from_code(type_code),
            name,
            starting_vcn,
            base_file_record: FileRecordReference::new(
                file_ref_raw & 0x0000_FFFF_FFFF_FFFF,
                (file_ref_raw >> 48) as u16,
            ),
            attribute_id,
        });
        pos += record_length;
    }
    Ok(AttributeList { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_information_timestamps() {
        let mut data = Vec::new();
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(&200u64.to_le_bytes());
        data.extend_from_slice(&300u64.to_le_bytes());
        data.extend_from_slice(&400u64.to_le_bytes());
        data.extend_from_slice(&0x20u32.to_le_bytes());
        let kind = AttributeKind::parse(AttributeType::StandardInformation, &data).unwrap();
        match kind {
            AttributeKind::StandardInformation(si) => {
                assert_eq!(si.creation_time, 100);
                assert_eq!(si.file_attributes, 0x20);
            }
            _ => panic!("expected StandardInformation"),
        }
    }

    #[test]
    fn unknown_type_parses_as_raw() {
        let kind = AttributeKind::parse(AttributeType::Data, &[1, 2, 3]).unwrap();
        assert!(matches!(kind, AttributeKind::Raw));
    }

    #[test]
    fn parses_volume_name() {
        let name: Vec<u8> = "vol".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let kind = AttributeKind::parse(AttributeType::VolumeName, &name).unwrap();
        match kind {
            AttributeKind::VolumeName(v) => assert_eq!(v.name, "vol"),
            _ => panic!("expected VolumeName"),
        }
    }
}
