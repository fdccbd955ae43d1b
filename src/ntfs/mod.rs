//! NTFS attribute model: unifying resident and non-resident MFT
//! attribute extents into one logical [`attribute::NtfsAttribute`] view,
//! plus the structured payload dispatch for the closed set of typed
//! attributes.
//!
//! This is not a full NTFS filesystem driver: directory traversal, MFT
//! record parsing beyond attribute extents, and on-disk mutation of
//! anything but the in-memory extent map are out of scope (see
//! Non-goals).

pub mod attribute;
pub mod databuffer;
pub mod record;
pub mod typed;
pub mod types;

pub use attribute::NtfsAttribute;
pub use databuffer::DataBuffer;
pub use record::{
    AttributeHeader, AttributeRecord, AttributeType, ClusterRun, NonResidentAttributeRecord,
    ResidentAttributeRecord,
};
pub use typed::AttributeKind;
pub use types::{AttributeReference, FileRecordReference};
