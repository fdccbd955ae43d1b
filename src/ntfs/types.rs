//! Identity types shared across NTFS attribute records: a reference to
//! the MFT file record an attribute extent lives in, and the composite
//! key that identifies one logical attribute across MFT-record
//! boundaries.

/// Points at one MFT file record: its segment number plus the sequence
/// number used to detect a reused, since-recycled record slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FileRecordReference {
    pub segment_number: u64,
    pub sequence_number: u16,
}

impl FileRecordReference {
    pub fn new(segment_number: u64, sequence_number: u16) -> Self {
        FileRecordReference {
            segment_number,
            sequence_number,
        }
    }
}

/// `(containingFile, attributeId)`: total equality/hash, used as the key
/// into an `NtfsAttribute`'s extent map so the same logical attribute can
/// be identified across several MFT records (via `$ATTRIBUTE_LIST`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttributeReference {
    pub containing_file: FileRecordReference,
    pub attribute_id: u16,
}

impl AttributeReference {
    pub fn new(containing_file: FileRecordReference, attribute_id: u16) -> Self {
        AttributeReference {
            containing_file,
            attribute_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_equality_is_total_over_both_fields() {
        let file_a = FileRecordReference::new(5, 1);
        let file_b = FileRecordReference::new(5, 2);
        let ref_a = AttributeReference::new(file_a, 3);
        let ref_b = AttributeReference::new(file_b, 3);
        assert_ne!(ref_a, ref_b);
        assert_eq!(ref_a, AttributeReference::new(file_a, 3));
    }
}
