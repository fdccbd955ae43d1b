//! Reading VMDK virtual disks: a [`descriptor::DescriptorFile`] naming one
//! or more extent files, and the flat/sparse/zero extent data plane those
//! extents point at.
//!
//! Currently VMDK files using flat and sparse (compressed or not) extents
//! are supported. Reading a VMDK with a parent (differencing/snapshot
//! disk) is out of scope, as is modifying the extent layout.

pub mod descriptor;
mod sparse;

use std::io::{self, Read, Seek, SeekFrom};

use log::debug;

use crate::error::{Error, Result};
use crate::file_locator::{ByteStream, FileAccess, FileLocator, FileMode, FileShare};

pub use descriptor::{AdapterType, CreateType, DescriptorFile, ExtentAccess, ExtentDescriptor};
use sparse::{read_raw_extent, read_sparse_extent, SparseExtentMetadata, SparseFileHeader, SECTOR_SIZE};

struct ExtentFile {
    description: ExtentDescriptor,
    start_sector: u64,
    stream: Box<dyn ByteStream>,
    sparse_metadata: Option<SparseExtentMetadata>,
}

impl ExtentFile {
    fn read_data(&mut self, start_pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self.description.extent_type.as_str() {
            "FLAT" | "VMFS" => read_raw_extent(&mut self.stream, buf, start_pos),
            "SPARSE" => read_sparse_extent(
                &mut self.stream,
                buf,
                start_pos,
                self.sparse_metadata.as_ref().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "no sparse extent metadata available")
                })?,
            ),
            "ZERO" => {
                buf.fill(0);
                Ok(buf.len())
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported extent type: {other}"),
            )),
        }
    }
}

/// An open VMDK virtual disk: descriptor metadata plus live handles to
/// every extent file it names.
pub struct VMDK {
    descriptor: DescriptorFile,
    extents: Vec<ExtentFile>,
    position: u64,
    total_bytes: u64,
}

fn read_sparse_header<S: Read + Seek>(stream: &mut S, at_end: bool) -> Result<SparseFileHeader> {
    if at_end {
        stream.seek(SeekFrom::End(-1024))?;
    } else {
        stream.seek(SeekFrom::Start(0))?;
    }
    let mut header_data = [0u8; 80];
    stream.read_exact(&mut header_data)?;
    SparseFileHeader::parse(&header_data)
}

fn read_embedded_descriptor<S: Read + Seek>(
    stream: &mut S,
    header: &SparseFileHeader,
) -> Result<DescriptorFile> {
    if header.embedded_descriptor_sector == 0 || header.embedded_descriptor_sectors_count == 0 {
        return Err(Error::NotFound("embedded VMDK descriptor".to_string()));
    }
    let mut buf = vec![0u8; header.embedded_descriptor_sectors_count as usize * SECTOR_SIZE as usize];
    stream.seek(SeekFrom::Start(header.embedded_descriptor_sector * SECTOR_SIZE))?;
    stream.read_exact(&mut buf)?;
    DescriptorFile::parse(&String::from_utf8_lossy(&buf))
}

impl VMDK {
    /// Opens `name` through `locator`, which must be rooted at the
    /// directory containing the descriptor (or monolithic sparse) file;
    /// extent files are resolved relative to the same locator.
    pub fn open(locator: &dyn FileLocator, name: &str) -> Result<VMDK> {
        debug!("Opening VMDK descriptor via locator: {}", name);
        let mut stream = locator.open(name, FileMode::Open, FileAccess::Read, FileShare::Read)?;

        let mut magic = [0u8; 4];
        let is_sparse = stream.read(&mut magic)? == 4 && &magic == b"KDMV";

        let mut descriptor = if is_sparse {
            debug!("Monolithic sparse VMDK detected");
            let header = read_sparse_header(&mut stream, false)?;
            read_embedded_descriptor(&mut stream, &header)?
        } else {
            debug!("Standalone VMDK descriptor file");
            let mut text = String::new();
            stream.seek(SeekFrom::Start(0))?;
            stream.read_to_string(&mut text)?;
            DescriptorFile::parse(&text)?
        };

        if descriptor.parent_content_id().unwrap_or(0xffff_ffff) != 0xffff_ffff {
            return Err(Error::UnknownEnum {
                kind: "VMDK differencing disk",
                token: "parentCID".to_string(),
            });
        }

        let mut next_start = 0u64;
        for extent in &mut descriptor.extents {
            if extent.offset.is_none() {
                extent.offset = Some(next_start);
            }
            next_start = extent.offset.unwrap().saturating_add(extent.size_sectors);
        }

        // A monolithic sparse / streamOptimized disk has no separate extent
        // file; the descriptor's own name is the (single) extent's backing file.
        let single_embedded = descriptor.extents.len() == 1
            && matches!(
                descriptor.create_type(),
                Ok(CreateType::MonolithicSparse) | Ok(CreateType::StreamOptimized)
            );
        if single_embedded {
            descriptor.extents[0].filename = Some(name.to_string());
        }

        let total_bytes: u64 = descriptor.extents.iter().map(|e| e.size_sectors).sum::<u64>() * SECTOR_SIZE;

        let mut extents = Vec::with_capacity(descriptor.extents.len());
        let mut reused_sparse_header: Option<SparseFileHeader> = if is_sparse {
            Some(read_sparse_header(&mut stream, false)?)
        } else {
            None
        };
        for extent in &descriptor.extents {
            let Some(ref filename) = extent.filename else {
                continue;
            };
            let single_file = single_embedded && filename == name;
            let mut extent_stream = if single_file {
                stream.seek(SeekFrom::Start(0))?;
                locator.open(name, FileMode::Open, FileAccess::Read, FileShare::Read)?
            } else {
                locator.open(filename, FileMode::Open, FileAccess::Read, FileShare::Read)?
            };

            let sparse_metadata = if extent.extent_type == "SPARSE" {
                let stream_optimized = matches!(descriptor.create_type(), Ok(CreateType::StreamOptimized));
                let header = if single_file && reused_sparse_header.is_some() && !stream_optimized {
                    reused_sparse_header.take().unwrap()
                } else if stream_optimized {
                    read_sparse_header(&mut extent_stream, true)?
                } else {
                    read_sparse_header(&mut extent_stream, false)?
                };
                debug!("Parsed sparse extent header: {:?}", header);
                Some(SparseExtentMetadata::read_from(&mut extent_stream, &header)?)
            } else {
                None
            };

            extents.push(ExtentFile {
                description: extent.clone(),
                start_sector: extent.offset.unwrap_or(0),
                stream: extent_stream,
                sparse_metadata,
            });
        }

        Ok(VMDK {
            descriptor,
            extents,
            position: 0,
            total_bytes,
        })
    }

    pub fn descriptor(&self) -> &DescriptorFile {
        &self.descriptor
    }

    pub fn sector_size(&self) -> u64 {
        SECTOR_SIZE
    }

    pub fn print_info(&self) {
        log::info!("VMDK disk information:");
        log::info!("  Create type: {:?}", self.descriptor.create_type());
        for extent in &self.descriptor.extents {
            log::info!(
                "    - {} sectors at sector {}, file {:?}",
                extent.size_sectors,
                extent.offset.unwrap_or(0),
                extent.filename
            );
        }
        log::info!("  Content ID: {:x?}", self.descriptor.content_id());
    }
}

impl Read for VMDK {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let buf_len = buf.len() as u64;
        let position = self.position;
        let mut total_read = 0usize;

        for extent in self.extents.iter_mut() {
            let start_of_extent = extent.start_sector * SECTOR_SIZE;
            let end_of_extent = start_of_extent + extent.description.size_sectors * SECTOR_SIZE;
            let covers_start = position >= start_of_extent && position < end_of_extent;
            let covers_end = position + buf_len >= start_of_extent && position + buf_len < end_of_extent;
            let spans_over = position < start_of_extent && position + buf_len > end_of_extent;
            if !(covers_start || covers_end || spans_over) {
                continue;
            }

            let start_position = position.saturating_sub(start_of_extent);
            let end_position = if position + buf_len >= end_of_extent {
                end_of_extent - start_of_extent
            } else {
                position + buf_len - start_of_extent
            };
            let buffer_start = if start_of_extent <= position {
                0
            } else {
                start_of_extent - position
            };
            let buffer_end = (buffer_start + end_position - start_position) as usize;
            let read_bytes = extent.read_data(start_position, &mut buf[buffer_start as usize..buffer_end])?;
            total_read += read_bytes;
        }
        self.position += total_read as u64;
        Ok(total_read)
    }
}

impl Seek for VMDK {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position as i64 + offset,
            SeekFrom::End(offset) => self.total_bytes as i64 + offset,
        };
        if new_pos < 0 || new_pos as u64 > self.total_bytes {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "offset is out of bounds"));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_locator::HostFileLocator;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("exhume_body_vmdk_test_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn opens_flat_vmdk_through_file_locator() {
        let dir = scratch_dir("flat");
        let flat_data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        std::fs::write(dir.join("disk-f001.vmdk"), &flat_data).unwrap();

        let descriptor_text = r#"# Disk DescriptorFile
version=1
CID=00000001
parentCID=ffffffff
createType="monolithicFlat"

# Extent description
RW 8 FLAT "disk-f001.vmdk"

# The Disk Data Base
#DDB
ddb.adapterType="lsilogic"
"#;
        std::fs::write(dir.join("disk.vmdk"), descriptor_text).unwrap();

        let locator = HostFileLocator::new(&dir);
        let mut vmdk = VMDK::open(&locator, "disk.vmdk").unwrap();
        let mut buf = [0u8; 16];
        vmdk.seek(SeekFrom::Start(10)).unwrap();
        let n = vmdk.read(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf[..], &flat_data[10..26]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_extent_with_parent_cid() {
        let dir = scratch_dir("parent");
        let descriptor_text = r#"# Disk DescriptorFile
version=1
CID=00000001
parentCID=00000002
createType="monolithicFlat"

# Extent description
RW 8 FLAT "disk-f001.vmdk"

# The Disk Data Base
#DDB
"#;
        std::fs::write(dir.join("disk.vmdk"), descriptor_text).unwrap();
        std::fs::write(dir.join("disk-f001.vmdk"), vec![0u8; 4096]).unwrap();

        let locator = HostFileLocator::new(&dir);
        assert!(VMDK::open(&locator, "disk.vmdk").is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
