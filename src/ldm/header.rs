//! The LDM database header: the first 512-byte sector of the VMDB region.

use crate::byteio::ByteReader;
use crate::error::Result;

/// `HeaderSize`/`BlockSize`/`NumVBlks` bit-exact fields, big-endian, read
/// from the first sector of the LDM metadata database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub header_size: u32,
    pub block_size: u32,
    pub num_vblks: u32,
}

impl DatabaseHeader {
    /// Parses a header from one already-read 512-byte sector.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(sector);
        r.seek(0);
        r.skip(4); // signature ("PRIVHEAD" lives further in on real disks; the VMDB sector here starts at HeaderSize)
        let header_size = r.read_u32_be()?;
        let _unknown = r.read_u32_be()?;
        let block_size = r.read_u32_be()?;
        r.skip(4);
        let num_vblks = r.read_u32_be()?;
        Ok(DatabaseHeader {
            header_size,
            block_size,
            num_vblks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sector() -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        sector[0..4].copy_from_slice(b"VMDB");
        sector[4..8].copy_from_slice(&16u32.to_be_bytes()); // header_size
        sector[8..12].copy_from_slice(&0u32.to_be_bytes());
        sector[12..16].copy_from_slice(&128u32.to_be_bytes()); // block_size
        sector[16..20].copy_from_slice(&0u32.to_be_bytes());
        sector[20..24].copy_from_slice(&10u32.to_be_bytes()); // num_vblks
        sector
    }

    #[test]
    fn parses_header_fields() {
        let header = DatabaseHeader::parse(&sample_sector()).unwrap();
        assert_eq!(header.header_size, 16);
        assert_eq!(header.block_size, 128);
        assert_eq!(header.num_vblks, 10);
    }
}
