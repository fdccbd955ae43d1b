//! Format-agnostic reading of virtual disk containers, dynamic-disk
//! metadata and NTFS attribute structures: a VMDK descriptor/extent
//! reader, an LDM (Logical Disk Manager) dynamic-disk database decoder,
//! an NTFS attribute model, and the `FileLocator` capability they are
//! all built against so the same codecs work whether the bytes live on
//! the host filesystem or inside another virtual disk's filesystem.

pub mod byteio;
pub mod error;
pub mod file_locator;
pub mod ldm;
pub mod ntfs;
pub mod vmdk;

pub use error::{Error, Result};
