//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Work out where the Central Directory really starts, which also
//!    reveals any bytes prepended to the archive (launcher stubs)
//! 4. Read the Central Directory to get metadata for all files
//!
//! The appender uses all four steps to learn where new entries go and
//! which names the archive already holds.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Location and trailer data of an archive's Central Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectory {
    /// Absolute file position of the first central record
    pub start: u64,
    /// Size of the central records in bytes
    pub size: u64,
    /// Number of central records
    pub total_entries: u64,
    /// Bytes preceding the archive proper; stored offsets are relative to this
    pub prefix_len: u64,
    /// Archive comment following the EOCD record
    pub comment: Vec<u8>,
    /// Whether the archive carried ZIP64 end records
    pub zip64: bool,
}

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type so tests can
/// feed it anything that implements [`ReadAt`].
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// if let Some(cd) = parser.locate_central_directory().await? {
///     let records = parser.read_central_directory(&cd).await?;
///     for entry in parser.parse_entries(&cd, &records)? {
///         println!("{} ({} bytes)", entry.file_name, entry.uncompressed_size);
///     }
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// `Some((record, offset))` when found, `None` when the source does
    /// not end like a ZIP archive.
    pub async fn find_eocd(&self) -> Result<Option<(EndOfCentralDirectory, u64)>> {
        // First try the simple case where there's no comment.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf).await?;

            // Check for signature and zero-length comment
            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok(Some((eocd, offset)));
            }
        }

        // EOCD not at expected location - the archive may have a comment.
        // Search backwards from the end of the file.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok(Some((eocd, search_start + i as u64)));
                }
            }
        }

        Ok(None)
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    ///
    /// # Returns
    ///
    /// The parsed record and its absolute position in the source.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64EOCD, u64)> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            bail!("Invalid ZIP64 format");
        };
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        // The locator's offset is relative to the archive start. Try it first,
        // then the position right before the locator for prefixed archives.
        let mut candidates = vec![locator.eocd64_offset];
        if let Some(adjacent) = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64) {
            if adjacent != locator.eocd64_offset {
                candidates.push(adjacent);
            }
        }

        for offset in candidates {
            if offset + Zip64EOCD::MIN_SIZE as u64 > locator_offset {
                continue;
            }
            let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
            self.reader.read_exact_at(offset, &mut eocd64_buf).await?;
            if let Ok(eocd64) = Zip64EOCD::from_bytes(&eocd64_buf) {
                return Ok((eocd64, offset));
            }
        }

        bail!("Invalid ZIP64 format")
    }

    /// Locate the Central Directory and collect everything needed to
    /// rewrite the archive tail.
    ///
    /// Returns `None` when the source has no EOCD record at all.
    pub async fn locate_central_directory(&self) -> Result<Option<CentralDirectory>> {
        let Some((eocd, eocd_offset)) = self.find_eocd().await? else {
            return Ok(None);
        };

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries, records_start, zip64) = if eocd.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset).await?;
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                eocd64_offset,
                true,
            )
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
                false,
            )
        };

        // The central directory ends where the end records begin; any gap
        // between that and the recorded offset is prepended data.
        let Some(start) = records_start.checked_sub(cd_size) else {
            bail!("Invalid Central Directory size");
        };
        let Some(prefix_len) = start.checked_sub(cd_offset) else {
            bail!("Invalid Central Directory offset");
        };

        let comment_start = eocd_offset + EndOfCentralDirectory::SIZE as u64;
        let comment_len = (eocd.comment_len as u64).min(self.size - comment_start);
        let mut comment = vec![0u8; comment_len as usize];
        self.reader.read_exact_at(comment_start, &mut comment).await?;

        Ok(Some(CentralDirectory {
            start,
            size: cd_size,
            total_entries,
            prefix_len,
            comment,
            zip64,
        }))
    }

    /// Read the raw Central Directory records.
    pub async fn read_central_directory(&self, cd: &CentralDirectory) -> Result<Vec<u8>> {
        let mut cd_data = vec![0u8; cd.size as usize];
        self.reader.read_exact_at(cd.start, &mut cd_data).await?;
        Ok(cd_data)
    }

    /// Parse the raw records returned by
    /// [`read_central_directory`](Self::read_central_directory).
    ///
    /// Local header offsets in the result are absolute positions in
    /// the source, prepended data included.
    pub fn parse_entries(&self, cd: &CentralDirectory, cd_data: &[u8]) -> Result<Vec<ZipFileEntry>> {
        let mut entries = Vec::with_capacity(cd.total_entries.min(u16::MAX as u64) as usize);
        let mut cursor = Cursor::new(cd_data);

        for _ in 0..cd.total_entries {
            let mut entry = self.parse_cdfh(&mut cursor)?;
            entry.lfh_offset += cd.prefix_len;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    ///
    /// The CDFH contains metadata about a file in the archive, including
    /// its name, sizes, and location of the actual file data.
    fn parse_cdfh(&self, cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            bail!("Invalid Central Directory File Header");
        }

        // Read fixed-size header fields
        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        // Read the variable-length file name
        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        // Parse extra field for ZIP64 extended information
        let extra_field_end = cursor.position() + extra_field_length as u64;

        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()?;
            let field_end = cursor.position() + field_size as u64;

            if header_id == ZIP64_EXTRA_ID {
                // Fields are present only if corresponding header field is 0xFFFFFFFF
                if uncompressed_size == ZIP64_U32 as u64 && cursor.position() + 8 <= field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == ZIP64_U32 as u64 && cursor.position() + 8 <= field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == ZIP64_U32 as u64 && cursor.position() + 8 <= field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
            }

            // Skip whatever is left of this field
            cursor.set_position(field_end);
        }

        // Ensure cursor is positioned after extra field and skip the comment
        cursor.set_position(extra_field_end + file_comment_length as u64);

        Ok(ZipFileEntry {
            file_name,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
        })
    }

}
