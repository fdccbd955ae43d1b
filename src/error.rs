//! Crate-wide error taxonomy.
//!
//! One enum covers all four subsystems (VMDK descriptor parsing, LDM
//! database decoding, NTFS attribute extent bookkeeping, and the
//! `FileLocator` capability) the same way `onuse-moses`'s `MosesError`
//! or `ColinFinck-ntfs`'s `NtfsError` cover their respective crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A fixed-size structured read could not be filled.
    #[error("unexpected end of stream while reading {context}")]
    UnexpectedEof { context: String },

    /// LDM duplicate id, invalid header fields, or a block signature/version
    /// mismatch that is a structural violation rather than a harmless
    /// unknown block (those are skipped, see `ldm::database`).
    #[error("corrupt LDM database: {0}")]
    CorruptDatabase(String),

    /// A VMDK descriptor-file line is neither blank, a comment, an extent
    /// line, nor a `KEY=VALUE` pair.
    #[error("malformed descriptor file line: {0:?}")]
    MalformedLine(String),

    /// A UUID string did not decode to exactly 16 bytes.
    #[error("invalid UUID string: {0:?}")]
    InvalidUuid(String),

    /// A token did not match any member of a closed enumeration
    /// (`createType`, `adapterType`, extent access/type, ...).
    #[error("unrecognized {kind} token: {token:?}")]
    UnknownEnum { kind: &'static str, token: String },

    /// A lookup by id, GUID, or name returned nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// `NtfsAttribute::add_extent` was called with a reference already
    /// present in the extent map.
    #[error("duplicate attribute extent: {0:?}")]
    DuplicateExtent(String),

    /// `getNonResidentExtent` was called on an attribute that has (or
    /// contains) a resident extent, which carries no VCN range.
    #[error("resident attribute extent has no VCN range")]
    ResidentHasNoVcn,

    /// A requested VCN is outside every extent's `[StartVcn, LastVcn]`.
    #[error("VCN {0} is out of range for this attribute")]
    OutOfRange(u64),

    /// `FirstExtent`/`LastExtent` could not find a matching extent in an
    /// attribute whose extent map should be non-empty and VCN-contiguous.
    #[error("inconsistent attribute extents: {0}")]
    InconsistentExtents(String),

    /// `FileLocator::open` was denied by the underlying filesystem's
    /// permission model.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Pass-through I/O failure from the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
