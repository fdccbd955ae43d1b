//! `NtfsAttribute`: the unified view of one logical attribute assembled
//! from one or more `AttributeRecord` extents, keyed by
//! `(containingFile, attributeId)` pairs so the same attribute can be
//! split across MFT records via `$ATTRIBUTE_LIST`.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::warn;

use crate::error::{Error, Result};
use crate::file_locator::{ByteStream, FileAccess};

use super::databuffer::DataBuffer;
use super::record::{AttributeRecord, ClusterRun, NonResidentAttributeRecord};
use super::typed::AttributeKind;
use super::types::{AttributeReference, FileRecordReference};

/// `fromRecord`'s construction result plus the live extent map.
#[derive(Debug, Clone)]
pub struct NtfsAttribute {
    primary_reference: AttributeReference,
    primary_record: AttributeRecord,
    primary_kind: AttributeKind,
    containing_file: FileRecordReference,
    extents: HashMap<AttributeReference, AttributeRecord>,
}

/// Dispatches on `record.AttributeType` to select either a plain
/// attribute wrapper (`AttributeKind::Raw`) or a typed parser wrapper,
/// per the construction rule. Only resident payloads are available at
/// construction time; a non-resident record has no eagerly-available
/// byte buffer to parse, so it is always `Raw` here (re-parsing the
/// reassembled buffer, once read, is the caller's job).
fn dispatch_kind(record: &AttributeRecord) -> AttributeKind {
    let attribute_type = record.header().attribute_type;
    let payload: &[u8] = match record {
        AttributeRecord::Resident(r) => &r.data,
        AttributeRecord::NonResident(_) => &[],
    };
    AttributeKind::parse(attribute_type, payload).unwrap_or(AttributeKind::Raw)
}

impl NtfsAttribute {
    /// Dispatches on `record`'s resident/non-resident shape to build the
    /// initial single-extent attribute, and on `record.AttributeType` to
    /// select the typed parser wrapper ([`dispatch_kind`]) exposed via
    /// [`Self::kind`].
    pub fn from_record(
        containing_file: FileRecordReference,
        attribute_id: u16,
        record: AttributeRecord,
    ) -> NtfsAttribute {
        let reference = AttributeReference::new(containing_file, attribute_id);
        let kind = dispatch_kind(&record);
        let mut extents = HashMap::new();
        extents.insert(reference, record.clone());
        NtfsAttribute {
            primary_reference: reference,
            primary_record: record,
            primary_kind: kind,
            containing_file,
            extents,
        }
    }

    pub fn reference(&self) -> AttributeReference {
        self.primary_reference
    }

    pub fn primary_record(&self) -> &AttributeRecord {
        &self.primary_record
    }

    /// The typed parser wrapper selected for the primary extent at
    /// construction time; `AttributeKind::Raw` for untyped attribute
    /// types and for non-resident primaries (see [`dispatch_kind`]).
    pub fn kind(&self) -> &AttributeKind {
        &self.primary_kind
    }

    pub fn containing_file(&self) -> FileRecordReference {
        self.containing_file
    }

    pub fn extents(&self) -> impl Iterator<Item = (&AttributeReference, &AttributeRecord)> {
        self.extents.iter()
    }

    /// Inserts `record` at `reference`. Fails with `DuplicateExtent` if
    /// `reference` is already present.
    pub fn add_extent(&mut self, reference: AttributeReference, record: AttributeRecord) -> Result<()> {
        if self.extents.contains_key(&reference) {
            return Err(Error::DuplicateExtent(format!("{:?}", reference)));
        }
        self.extents.insert(reference, record);
        Ok(())
    }

    /// Removes `reference`; silent no-op if absent, matching the
    /// source's documented (if surprising) default. Callers that want
    /// strict removal should use [`Self::remove_extent_checked`].
    pub fn remove_extent(&mut self, reference: &AttributeReference) {
        self.extents.remove(reference);
    }

    /// Strict variant of [`Self::remove_extent`]: fails with `NotFound`
    /// if `reference` was not present.
    pub fn remove_extent_checked(&mut self, reference: &AttributeReference) -> Result<()> {
        if self.extents.remove(reference).is_none() {
            return Err(Error::NotFound(format!("{:?}", reference)));
        }
        Ok(())
    }

    /// Clears all extents and replaces them with a single `(reference →
    /// record)` pair; updates the primary record and containing-file
    /// reference to the new ones.
    pub fn set_extent(&mut self, reference: AttributeReference, record: AttributeRecord) {
        self.extents.clear();
        self.extents.insert(reference, record.clone());
        self.primary_reference = reference;
        self.primary_kind = dispatch_kind(&record);
        self.primary_record = record;
        self.containing_file = reference.containing_file;
    }

    /// Returns `false` if `old_reference` was not present. Otherwise
    /// removes it and inserts `(new_reference → record)`; if
    /// `old_reference` was the current primary reference, or the map was
    /// empty just before reinsertion, the primary record and containing
    /// file reference are updated to the new ones.
    pub fn replace_extent(
        &mut self,
        old_reference: AttributeReference,
        new_reference: AttributeReference,
        record: AttributeRecord,
    ) -> bool {
        if self.extents.remove(&old_reference).is_none() {
            return false;
        }
        let was_primary = old_reference == self.primary_reference;
        let map_was_empty = self.extents.is_empty();
        self.extents.insert(new_reference, record.clone());
        if was_primary || map_was_empty {
            self.primary_reference = new_reference;
            self.primary_kind = dispatch_kind(&record);
            self.primary_record = record;
            self.containing_file = new_reference.containing_file;
        }
        true
    }

    /// Returns the non-resident extent whose `[StartVcn, LastVcn]` range
    /// covers `target_vcn`. Fails with `ResidentHasNoVcn` if any extent
    /// in the map is resident, or `OutOfRange` if none covers it.
    pub fn get_non_resident_extent(&self, target_vcn: u64) -> Result<&AttributeRecord> {
        for record in self.extents.values() {
            if !record.is_non_resident() {
                return Err(Error::ResidentHasNoVcn);
            }
        }
        self.extents
            .values()
            .find(|record| {
                let nr = record.as_non_resident().expect("checked above");
                nr.start_vcn <= target_vcn && target_vcn <= nr.last_vcn
            })
            .ok_or(Error::OutOfRange(target_vcn))
    }

    /// Resident attributes have exactly one extent and it is always
    /// "first". For non-resident attributes, the extent with `StartVcn
    /// == 0`.
    pub fn first_extent(&self) -> Result<&AttributeRecord> {
        if let Some(record) = self.extents.values().find(|r| !r.is_non_resident()) {
            return Ok(record);
        }
        self.extents
            .values()
            .find(|record| {
                record
                    .as_non_resident()
                    .map(|nr| nr.start_vcn == 0)
                    .unwrap_or(false)
            })
            .ok_or_else(|| Error::InconsistentExtents("no extent with StartVcn == 0".to_string()))
    }

    /// The non-resident extent with the maximum `LastVcn`, or the
    /// (unique) resident extent.
    pub fn last_extent(&self) -> Result<&AttributeRecord> {
        if let Some(record) = self.extents.values().find(|r| !r.is_non_resident()) {
            return Ok(record);
        }
        self.extents
            .values()
            .max_by_key(|record| record.as_non_resident().map(|nr| nr.last_vcn).unwrap_or(0))
            .ok_or_else(|| Error::InconsistentExtents("no extents present".to_string()))
    }

    /// `record.offsetToAbsolutePos(offset, 0, bytesPerCluster)` for
    /// non-resident attributes; for resident attributes this crate does
    /// not model the MFT's own `$DATA` attribute, so callers must supply
    /// `mft_data_resolver` to translate the attribute's record-relative
    /// start into an absolute byte position.
    pub fn offset_to_absolute_pos<F>(&self, offset: u64, bytes_per_cluster: u64, mft_data_resolver: F) -> Result<u64>
    where
        F: FnOnce() -> Result<u64>,
    {
        match &self.primary_record {
            AttributeRecord::NonResident(nr) => {
                let cluster = offset / bytes_per_cluster;
                let within = offset % bytes_per_cluster;
                let mut cluster_cursor = 0u64;
                for run in &nr.runs {
                    if cluster < cluster_cursor + run.length {
                        let lcn = run
                            .lcn
                            .ok_or_else(|| Error::InconsistentExtents("offset falls in a sparse run".to_string()))?;
                        let within_run = cluster - cluster_cursor;
                        return Ok((lcn as u64 + within_run) * bytes_per_cluster + within);
                    }
                    cluster_cursor += run.length;
                }
                Err(Error::OutOfRange(offset))
            }
            AttributeRecord::Resident(_) => {
                let attr_start = mft_data_resolver()?;
                Ok(attr_start + offset)
            }
        }
    }

    /// Builds the sparse, byte-addressable view of this attribute's
    /// data. A resident attribute has exactly one extent, so its buffer
    /// is built straight from that extent; a non-resident attribute may
    /// be fragmented across several MFT records via `$ATTRIBUTE_LIST`, so
    /// every non-resident extent's cluster runs are merged in `StartVcn`
    /// order into one run list. `CompressionUnitSize` is taken from
    /// `first_extent()` if non-resident, else 0, per the data buffer
    /// construction rule; `bytes_per_cluster` is volume-wide and supplied
    /// by the caller, as with [`Self::offset_to_absolute_pos`].
    pub fn get_data_buffer(&self, bytes_per_cluster: u64) -> Result<DataBuffer> {
        if let Some(resident) = self.extents.values().find(|r| !r.is_non_resident()) {
            return DataBuffer::from_record(resident, bytes_per_cluster);
        }

        let compression_unit_size = self.first_extent()?.as_non_resident()?.compression_unit_size;
        let data_length = self.primary_record.header().data_length;

        let mut non_resident: Vec<&NonResidentAttributeRecord> = self
            .extents
            .values()
            .map(|record| record.as_non_resident())
            .collect::<Result<_>>()?;
        non_resident.sort_by_key(|nr| nr.start_vcn);
        let runs: Vec<ClusterRun> = non_resident.into_iter().flat_map(|nr| nr.runs.iter().copied()).collect();

        Ok(DataBuffer::NonResident {
            runs,
            bytes_per_cluster,
            compression_unit_size,
            data_length,
        })
    }

    /// Opens a sparse byte stream over [`Self::get_data_buffer`].
    /// `cluster_reader` fetches the bytes backing one allocated cluster
    /// run (`(lcn, offset_within_cluster, buf)`); this crate has no
    /// concrete volume/cluster-reader type since the volume layer itself
    /// is out of scope, so callers supply it. Writes require `access` to
    /// include write and, for a non-resident attribute, are rejected:
    /// rewriting cluster runs is beyond the extent bookkeeping this crate
    /// models.
    pub fn open<F>(&self, access: FileAccess, bytes_per_cluster: u64, cluster_reader: F) -> Result<Box<dyn ByteStream>>
    where
        F: FnMut(i64, u64, &mut [u8]) -> Result<()> + Send + 'static,
    {
        let buffer = self.get_data_buffer(bytes_per_cluster)?;
        Ok(Box::new(AttributeStream {
            buffer,
            position: 0,
            access,
            cluster_reader: Box::new(cluster_reader),
        }))
    }

    /// A human-readable dump of this attribute's header and extents:
    /// `<TYPE> ATTRIBUTE (Name)`, the length, and a 32-byte hex preview of
    /// the primary extent's data. Any read failure while formatting is
    /// rendered as `"<can't read>"` rather than propagated, matching the
    /// one place this crate swallows errors.
    pub fn dump(&self) -> String {
        let header = self.primary_record.header();
        let mut out = format!(
            "{:?} ATTRIBUTE ({})\n",
            header.attribute_type,
            header.name.as_deref().unwrap_or("")
        );
        out.push_str(&format!("  length: {}\n", header.data_length));
        out.push_str(&format!("  data: {}\n", dump_or_unreadable(self.hex_preview())));
        for (reference, record) in &self.extents {
            let detail = match record {
                AttributeRecord::Resident(r) => format!("resident, {} bytes", r.data.len()),
                AttributeRecord::NonResident(r) => {
                    format!("nonresident vcn {}..{}, {} runs", r.start_vcn, r.last_vcn, r.runs.len())
                }
            };
            out.push_str(&format!("  extent {:?}: {}\n", reference, detail));
        }
        out
    }

    /// Up to 32 bytes of the primary extent's data, rendered as
    /// uppercase, space-separated hex pairs. Non-resident data is not
    /// available without a cluster reader, so it is reported unreadable
    /// rather than guessed at.
    fn hex_preview(&self) -> Result<String> {
        match &self.primary_record {
            AttributeRecord::Resident(r) => {
                let take = r.data.len().min(32);
                Ok(r.data[..take]
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect::<Vec<_>>()
                    .join(" "))
            }
            AttributeRecord::NonResident(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "non-resident attribute data is not available without a cluster reader",
            ))),
        }
    }
}

/// A [`ByteStream`] over an [`NtfsAttribute`]'s [`DataBuffer`], opened via
/// [`NtfsAttribute::open`].
struct AttributeStream {
    buffer: DataBuffer,
    position: u64,
    access: FileAccess,
    cluster_reader: Box<dyn FnMut(i64, u64, &mut [u8]) -> Result<()> + Send>,
}

impl Read for AttributeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .buffer
            .read_at(self.position, buf, &mut self.cluster_reader)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for AttributeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if matches!(self.access, FileAccess::Read) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream opened read-only"));
        }
        match &mut self.buffer {
            DataBuffer::Resident(data) => {
                let start = self.position as usize;
                if start + buf.len() > data.len() {
                    data.resize(start + buf.len(), 0);
                }
                data[start..start + buf.len()].copy_from_slice(buf);
                self.position += buf.len() as u64;
                Ok(buf.len())
            }
            DataBuffer::NonResident { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "non-resident attribute writes require a cluster writer, which this crate does not provide",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for AttributeStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => self.buffer.data_length() as i64 + p,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl ByteStream for AttributeStream {
    fn len(&self) -> io::Result<u64> {
        Ok(self.buffer.data_length())
    }
}

/// Renders `result` for display, swallowing any error as `"<can't
/// read>"` per the dump-time error policy.
pub fn dump_or_unreadable<T: std::fmt::Display>(result: Result<T>) -> String {
    match result {
        Ok(v) => v.to_string(),
        Err(e) => {
            warn!("dump read failed: {}", e);
            "<can't read>".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::record::{AttributeHeader, ClusterRun, NonResidentAttributeRecord};
    use crate::ntfs::record::AttributeType;

    fn non_resident(start_vcn: u64, last_vcn: u64) -> AttributeRecord {
        AttributeRecord::NonResident(NonResidentAttributeRecord {
            header: AttributeHeader {
                attribute_type: AttributeType::Data,
                attribute_id: 0,
                name: None,
                flags: 0,
                data_length: (last_vcn + 1) * 4096,
                is_non_resident: true,
            },
            start_vcn,
            last_vcn,
            compression_unit_size: 0,
            allocated_size: (last_vcn - start_vcn + 1) * 4096,
            runs: vec![ClusterRun {
                lcn: Some(1000),
                length: last_vcn - start_vcn + 1,
            }],
        })
    }

    #[test]
    fn s5_add_extent_updates_last_extent_and_lookup() {
        let file = FileRecordReference::new(1, 1);
        let ref1 = AttributeReference::new(file, 0);
        let mut attr = NtfsAttribute::from_record(file, 0, non_resident(0, 99));

        let ref2 = AttributeReference::new(file, 1);
        attr.add_extent(ref2, non_resident(100, 199)).unwrap();

        let last = attr.last_extent().unwrap().as_non_resident().unwrap();
        assert_eq!(last.start_vcn, 100);

        let found = attr.get_non_resident_extent(150).unwrap().as_non_resident().unwrap();
        assert_eq!(found.start_vcn, 100);

        assert!(matches!(
            attr.get_non_resident_extent(250),
            Err(Error::OutOfRange(250))
        ));

        let _ = ref1;
    }

    #[test]
    fn s6_set_extent_resets_to_single_entry() {
        let file = FileRecordReference::new(1, 1);
        let mut attr = NtfsAttribute::from_record(file, 0, non_resident(0, 99));
        let ref2 = AttributeReference::new(file, 1);
        attr.add_extent(ref2, non_resident(100, 199)).unwrap();
        let ref3 = AttributeReference::new(file, 2);
        attr.add_extent(ref3, non_resident(200, 299)).unwrap();

        let new_file = FileRecordReference::new(5, 1);
        let new_ref = AttributeReference::new(new_file, 0);
        attr.set_extent(new_ref, non_resident(0, 9));

        assert_eq!(attr.extents().count(), 1);
        assert_eq!(attr.reference(), new_ref);
    }

    #[test]
    fn duplicate_extent_insert_fails() {
        let file = FileRecordReference::new(1, 1);
        let reference = AttributeReference::new(file, 0);
        let mut attr = NtfsAttribute::from_record(file, 0, non_resident(0, 99));
        assert!(matches!(
            attr.add_extent(reference, non_resident(0, 99)),
            Err(Error::DuplicateExtent(_))
        ));
    }

    #[test]
    fn remove_extent_is_silent_noop_when_absent() {
        let file = FileRecordReference::new(1, 1);
        let mut attr = NtfsAttribute::from_record(file, 0, non_resident(0, 99));
        let missing = AttributeReference::new(file, 99);
        attr.remove_extent(&missing);
        assert_eq!(attr.extents().count(), 1);
    }

    #[test]
    fn remove_extent_checked_fails_when_absent() {
        let file = FileRecordReference::new(1, 1);
        let mut attr = NtfsAttribute::from_record(file, 0, non_resident(0, 99));
        let missing = AttributeReference::new(file, 99);
        assert!(matches!(
            attr.remove_extent_checked(&missing),
            Err(Error::NotFound(_))
        ));
    }

    fn resident(attribute_type: AttributeType, data: Vec<u8>) -> AttributeRecord {
        AttributeRecord::Resident(crate::ntfs::record::ResidentAttributeRecord {
            header: AttributeHeader {
                attribute_type,
                attribute_id: 0,
                name: None,
                flags: 0,
                data_length: data.len() as u64,
                is_non_resident: false,
            },
            data,
        })
    }

    #[test]
    fn from_record_dispatches_typed_kind_for_resident_standard_information() {
        let mut data = Vec::new();
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(&200u64.to_le_bytes());
        data.extend_from_slice(&300u64.to_le_bytes());
        data.extend_from_slice(&400u64.to_le_bytes());
        data.extend_from_slice(&0x20u32.to_le_bytes());
        let file = FileRecordReference::new(1, 1);
        let attr = NtfsAttribute::from_record(file, 0, resident(AttributeType::StandardInformation, data));
        assert!(matches!(attr.kind(), AttributeKind::StandardInformation(_)));
    }

    #[test]
    fn from_record_non_resident_kind_is_raw() {
        let file = FileRecordReference::new(1, 1);
        let attr = NtfsAttribute::from_record(file, 0, non_resident(0, 9));
        assert!(matches!(attr.kind(), AttributeKind::Raw));
    }

    fn non_resident_with_lcn(start_vcn: u64, last_vcn: u64, lcn: i64) -> AttributeRecord {
        AttributeRecord::NonResident(NonResidentAttributeRecord {
            header: AttributeHeader {
                attribute_type: AttributeType::Data,
                attribute_id: 0,
                name: None,
                flags: 0,
                data_length: (last_vcn + 1) * 4096,
                is_non_resident: true,
            },
            start_vcn,
            last_vcn,
            compression_unit_size: 0,
            allocated_size: (last_vcn - start_vcn + 1) * 4096,
            runs: vec![ClusterRun {
                lcn: Some(lcn),
                length: last_vcn - start_vcn + 1,
            }],
        })
    }

    #[test]
    fn get_data_buffer_merges_fragmented_non_resident_extents_in_vcn_order() {
        let file = FileRecordReference::new(1, 1);
        // Second fragment (StartVcn 100) constructed first so the extent
        // map's insertion/iteration order cannot accidentally match VCN
        // order.
        let mut attr = NtfsAttribute::from_record(file, 1, non_resident_with_lcn(100, 199, 5000));
        let ref0 = AttributeReference::new(file, 0);
        attr.add_extent(ref0, non_resident_with_lcn(0, 99, 1000)).unwrap();

        let buffer = attr.get_data_buffer(4096).unwrap();
        match buffer {
            DataBuffer::NonResident { runs, .. } => {
                assert_eq!(runs.len(), 2);
                assert_eq!(runs[0].lcn, Some(1000));
                assert_eq!(runs[1].lcn, Some(5000));
            }
            DataBuffer::Resident(_) => panic!("expected non-resident buffer"),
        }
    }

    #[test]
    fn get_data_buffer_resident_round_trips_through_open_stream() {
        let file = FileRecordReference::new(1, 1);
        let attr = NtfsAttribute::from_record(file, 0, resident(AttributeType::Data, vec![1, 2, 3, 4]));
        let mut stream = attr
            .open(crate::file_locator::FileAccess::Read, 4096, |_, _, _| unreachable!())
            .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn dump_formats_type_attribute_name_and_hex_preview() {
        let file = FileRecordReference::new(1, 1);
        let attr = NtfsAttribute::from_record(file, 0, resident(AttributeType::Data, vec![0xDE, 0xAD]));
        let dumped = attr.dump();
        assert!(dumped.starts_with("Data ATTRIBUTE ()\n"));
        assert!(dumped.contains("data: DE AD\n"));
    }
}
