//! `Database::load` reads the VMDB header sector, then `NumVBlks`
//! fixed-size blocks, dispatching each to a typed record or skipping it,
//! and indexes the result by record ID (plus a secondary by-type index
//! for the O(1) type-filtered queries below).

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use log::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::header::DatabaseHeader;
use super::records::{
    parse_block, ComponentRecord, DatabaseRecord, DiskGroupRecord, DiskRecord, ExtentRecord, RecordType,
    VolumeRecord,
};

const SECTOR_SIZE: u64 = 512;

/// The fully-loaded, read-mostly LDM metadata database. Concurrent readers
/// of an already-loaded `Database` are safe; there is no writer path
/// (writing new LDM databases is out of scope).
#[derive(Debug, Clone)]
pub struct Database {
    header: DatabaseHeader,
    records: HashMap<u64, DatabaseRecord>,
    by_type: HashMap<RecordType, Vec<u64>>,
}

impl Database {
    /// Reads the header sector at `db_start` and every VBLK block after
    /// it from `stream`, which must already be positioned arbitrarily
    /// (the read seeks explicitly).
    pub fn load<S: Read + Seek>(stream: &mut S, db_start: u64) -> Result<Self> {
        stream.seek(SeekFrom::Start(db_start))?;
        let mut sector = [0u8; SECTOR_SIZE as usize];
        stream.read_exact(&mut sector)?;
        let header = DatabaseHeader::parse(&sector)?;
        debug!("LDM database header: {:?}", header);

        let block_region_start = db_start + header.header_size as u64;
        stream.seek(SeekFrom::Start(block_region_start))?;

        let mut records = HashMap::new();
        let mut by_type: HashMap<RecordType, Vec<u64>> = HashMap::new();

        for i in 0..header.num_vblks {
            let mut block = vec![0u8; header.block_size as usize];
            if stream.read_exact(&mut block).is_err() {
                warn!("LDM block {} could not be read in full, stopping scan", i);
                break;
            }
            let parsed = match parse_block(&block) {
                Ok(p) => p,
                Err(e) => {
                    warn!("LDM block {} failed to parse ({}), skipping", i, e);
                    continue;
                }
            };
            let Some(record) = parsed else {
                continue;
            };
            let id = record.id();
            if records.contains_key(&id) {
                return Err(Error::CorruptDatabase(format!("duplicate record id {}", id)));
            }
            by_type.entry(record.record_type()).or_default().push(id);
            records.insert(id, record);
        }

        Ok(Database {
            header,
            records,
            by_type,
        })
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn by_type_iter(&self, ty: RecordType) -> impl Iterator<Item = &DatabaseRecord> {
        self.by_type
            .get(&ty)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.records.get(id))
    }

    /// Looks up a disk group by canonicalized GUID equality against
    /// `GroupGuidString`.
    pub fn get_disk_group(&self, guid: &str) -> Option<&DiskGroupRecord> {
        self.by_type_iter(RecordType::DiskGroup).find_map(|r| match r {
            DatabaseRecord::DiskGroup(g) if guids_equal(&g.group_guid_string, guid) => Some(g),
            _ => None,
        })
    }

    pub fn get_disk(&self, id: u64) -> Option<&DiskRecord> {
        match self.records.get(&id) {
            Some(DatabaseRecord::Disk(d)) => Some(d),
            _ => None,
        }
    }

    pub fn get_volume(&self, id: u64) -> Option<&VolumeRecord> {
        match self.records.get(&id) {
            Some(DatabaseRecord::Volume(v)) => Some(v),
            _ => None,
        }
    }

    pub fn disks(&self) -> impl Iterator<Item = &DiskRecord> {
        self.by_type_iter(RecordType::Disk).filter_map(|r| match r {
            DatabaseRecord::Disk(d) => Some(d),
            _ => None,
        })
    }

    pub fn volumes(&self) -> impl Iterator<Item = &VolumeRecord> {
        self.by_type_iter(RecordType::Volume).filter_map(|r| match r {
            DatabaseRecord::Volume(v) => Some(v),
            _ => None,
        })
    }

    /// Components whose `VolumeId` matches `volume_id`.
    pub fn get_volume_components(&self, volume_id: u64) -> impl Iterator<Item = &ComponentRecord> + '_ {
        self.by_type_iter(RecordType::Component).filter_map(move |r| match r {
            DatabaseRecord::Component(c) if c.volume_id == volume_id => Some(c),
            _ => None,
        })
    }

    /// Extents whose `ComponentId` matches `component_id`.
    pub fn get_component_extents(&self, component_id: u64) -> impl Iterator<Item = &ExtentRecord> + '_ {
        self.by_type_iter(RecordType::Extent).filter_map(move |r| match r {
            DatabaseRecord::Extent(e) if e.component_id == component_id => Some(e),
            _ => None,
        })
    }

    /// A single record by its database-wide unique ID, regardless of type.
    pub fn find_record(&self, id: u64) -> Option<&DatabaseRecord> {
        self.records.get(&id)
    }

    /// Checks invariants (b) and (c) from the spec: every component's
    /// `VolumeId` resolves, and every extent's `ComponentId` resolves.
    pub fn check_referential_integrity(&self) -> Result<()> {
        for r in self.records.values() {
            if let DatabaseRecord::Component(c) = r {
                if self.get_volume(c.volume_id).is_none() {
                    return Err(Error::CorruptDatabase(format!(
                        "component {} references missing volume {}",
                        c.id, c.volume_id
                    )));
                }
            }
            if let DatabaseRecord::Extent(e) = r {
                match self.records.get(&e.component_id) {
                    Some(DatabaseRecord::Component(_)) => {}
                    _ => {
                        return Err(Error::CorruptDatabase(format!(
                            "extent {} references missing component {}",
                            e.id, e.component_id
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// GUID comparison by canonical value rather than string representation:
/// `GroupGuidString` is parsed through `uuid::Uuid` so brace/case variance
/// between LDM and caller-supplied strings never causes a false mismatch.
/// Falls back to a trimmed, case-insensitive string compare if either side
/// does not parse as a standard dashed-hex UUID.
fn guids_equal(a: &str, b: &str) -> bool {
    let strip_braces = |s: &str| s.trim_matches(|c| c == '{' || c == '}');
    match (Uuid::parse_str(strip_braces(a)), Uuid::parse_str(strip_braces(b))) {
        (Ok(ua), Ok(ub)) => ua == ub,
        _ => strip_braces(a).eq_ignore_ascii_case(strip_braces(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_header(buf: &mut Vec<u8>, header_size: u32, block_size: u32, num_vblks: u32) {
        buf.extend_from_slice(b"VMDB");
        buf.extend_from_slice(&header_size.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&block_size.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&num_vblks.to_be_bytes());
        buf.resize(512, 0);
    }

    fn disk_group_block(id: u64, guid: &str) -> Vec<u8> {
        let mut block = vec![0u8; 128];
        block[0] = 0x01;
        block[1..9].copy_from_slice(&id.to_be_bytes());
        let guid_bytes = guid.as_bytes();
        block[9..9 + guid_bytes.len()].copy_from_slice(guid_bytes);
        block
    }

    fn volume_block(id: u64, guid: &str) -> Vec<u8> {
        let mut block = vec![0u8; 128];
        block[0] = 0x03;
        block[1..9].copy_from_slice(&id.to_be_bytes());
        let guid_bytes = guid.as_bytes();
        block[9..9 + guid_bytes.len()].copy_from_slice(guid_bytes);
        block
    }

    fn unknown_block() -> Vec<u8> {
        let mut block = vec![0u8; 128];
        block[0] = 0xee;
        block
    }

    #[test]
    fn loads_and_indexes_records() {
        let mut data = Vec::new();
        write_header(&mut data, 512, 128, 3);
        data.extend(disk_group_block(1, "aaaa"));
        data.extend(volume_block(2, "bbbb"));
        data.extend(unknown_block());

        let mut cursor = Cursor::new(data);
        let db = Database::load(&mut cursor, 0).unwrap();
        assert_eq!(db.len(), 2);
        assert!(db.get_disk_group("AAAA").is_some());
        assert_eq!(db.volumes().count(), 1);
    }

    #[test]
    fn disk_group_lookup_compares_guids_by_canonical_value() {
        let mut data = Vec::new();
        write_header(&mut data, 512, 128, 1);
        data.extend(disk_group_block(
            1,
            "11111111-2222-3333-4444-555555555555",
        ));

        let mut cursor = Cursor::new(data);
        let db = Database::load(&mut cursor, 0).unwrap();
        // Differs only in case and surrounding braces from the stored value.
        assert!(db
            .get_disk_group("{11111111-2222-3333-4444-555555555555}")
            .is_some());
        assert!(db
            .get_disk_group("11111111-2222-3333-4444-555555555556")
            .is_none());
    }

    #[test]
    fn duplicate_id_is_corrupt_database() {
        let mut data = Vec::new();
        write_header(&mut data, 512, 128, 2);
        data.extend(disk_group_block(1, "aaaa"));
        data.extend(volume_block(1, "bbbb"));

        let mut cursor = Cursor::new(data);
        assert!(matches!(
            Database::load(&mut cursor, 0),
            Err(Error::CorruptDatabase(_))
        ));
    }

    #[test]
    fn skip_unknown_block_scenario() {
        // S4: two valid blocks (DiskGroup, Volume) and one unrecognized
        // signature; load must yield a map of size 2, no error.
        let mut data = Vec::new();
        write_header(&mut data, 512, 128, 3);
        data.extend(disk_group_block(10, "cccc"));
        data.extend(volume_block(11, "dddd"));
        data.extend(unknown_block());

        let mut cursor = Cursor::new(data);
        let db = Database::load(&mut cursor, 0).unwrap();
        assert_eq!(db.len(), 2);
    }
}
