//! Typed LDM VBLK records: `DiskGroup`, `Disk`, `Volume`, `Component`, `Extent`.
//!
//! Each block in the VMDB region carries a leading signature tag
//! identifying its record type (or is reserved/unknown and must be
//! skipped). The dispatcher in [`super::database`] reads the tag and
//! routes to the matching `parse` function here.

use crate::byteio::ByteReader;
use crate::error::Result;

/// Discriminant recovered from a block's leading signature tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    DiskGroup,
    Disk,
    Volume,
    Component,
    Extent,
}

#[derive(Debug, Clone)]
pub struct DiskGroupRecord {
    pub id: u64,
    pub group_guid_string: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DiskRecord {
    pub id: u64,
    pub disk_guid_string: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct VolumeRecord {
    pub id: u64,
    pub volume_guid: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub id: u64,
    pub volume_id: u64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ExtentRecord {
    pub id: u64,
    pub component_id: u64,
    pub disk_id: u64,
    pub disk_offset: u64,
    pub length: u64,
}

/// A parsed VBLK record, tagged by its concrete kind. Data, not a type
/// hierarchy: the dispatcher below is a function over bytes, not a
/// class-per-type parser.
#[derive(Debug, Clone)]
pub enum DatabaseRecord {
    DiskGroup(DiskGroupRecord),
    Disk(DiskRecord),
    Volume(VolumeRecord),
    Component(ComponentRecord),
    Extent(ExtentRecord),
}

impl DatabaseRecord {
    pub fn id(&self) -> u64 {
        match self {
            DatabaseRecord::DiskGroup(r) => r.id,
            DatabaseRecord::Disk(r) => r.id,
            DatabaseRecord::Volume(r) => r.id,
            DatabaseRecord::Component(r) => r.id,
            DatabaseRecord::Extent(r) => r.id,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            DatabaseRecord::DiskGroup(_) => RecordType::DiskGroup,
            DatabaseRecord::Disk(_) => RecordType::Disk,
            DatabaseRecord::Volume(_) => RecordType::Volume,
            DatabaseRecord::Component(_) => RecordType::Component,
            DatabaseRecord::Extent(_) => RecordType::Extent,
        }
    }
}

const TAG_DISK_GROUP: u8 = 0x01;
const TAG_DISK: u8 = 0x02;
const TAG_VOLUME: u8 = 0x03;
const TAG_COMPONENT: u8 = 0x04;
const TAG_EXTENT: u8 = 0x05;

/// Parses one VBLK block. Returns `None` for an unrecognized signature
/// tag (reserved or unknown block type): the caller skips the block
/// rather than treating this as an error.
pub fn parse_block(block: &[u8]) -> Result<Option<DatabaseRecord>> {
    if block.is_empty() {
        return Ok(None);
    }
    let mut r = ByteReader::new(block);
    let tag = r.read_u8()?;
    let record = match tag {
        TAG_DISK_GROUP => {
            let id = r.read_u64_be()?;
            let group_guid_string = r.read_fixed_ascii(36)?;
            let name = r.read_fixed_ascii(64)?;
            DatabaseRecord::DiskGroup(DiskGroupRecord {
                id,
                group_guid_string,
                name,
            })
        }
        TAG_DISK => {
            let id = r.read_u64_be()?;
            let disk_guid_string = r.read_fixed_ascii(36)?;
            let name = r.read_fixed_ascii(64)?;
            DatabaseRecord::Disk(DiskRecord {
                id,
                disk_guid_string,
                name,
            })
        }
        TAG_VOLUME => {
            let id = r.read_u64_be()?;
            let volume_guid = r.read_fixed_ascii(36)?;
            let size = r.read_u64_be()?;
            let name = r.read_fixed_ascii(64)?;
            DatabaseRecord::Volume(VolumeRecord {
                id,
                volume_guid,
                name,
                size,
            })
        }
        TAG_COMPONENT => {
            let id = r.read_u64_be()?;
            let volume_id = r.read_u64_be()?;
            let name = r.read_fixed_ascii(64)?;
            DatabaseRecord::Component(ComponentRecord {
                id,
                volume_id,
                name,
            })
        }
        TAG_EXTENT => {
            let id = r.read_u64_be()?;
            let component_id = r.read_u64_be()?;
            let disk_id = r.read_u64_be()?;
            let disk_offset = r.read_u64_be()?;
            let length = r.read_u64_be()?;
            DatabaseRecord::Extent(ExtentRecord {
                id,
                component_id,
                disk_id,
                disk_offset,
                length,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_group_block() -> Vec<u8> {
        let mut block = vec![0u8; 128];
        block[0] = TAG_DISK_GROUP;
        block[1..9].copy_from_slice(&7u64.to_be_bytes());
        block[9..45].copy_from_slice(b"11111111-2222-3333-4444-555555555555");
        block
    }

    #[test]
    fn parses_disk_group_block() {
        let record = parse_block(&disk_group_block()).unwrap().unwrap();
        match record {
            DatabaseRecord::DiskGroup(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.group_guid_string, "11111111-2222-3333-4444-555555555555");
            }
            _ => panic!("expected DiskGroup"),
        }
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let mut block = vec![0u8; 16];
        block[0] = 0xff;
        assert!(parse_block(&block).unwrap().is_none());
    }
}
