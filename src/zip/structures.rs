use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::io::{Cursor, Write};

use anyhow::{bail, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Sentinel stored in 16-bit fields whose real value lives in ZIP64 records
pub const ZIP64_U16: u16 = 0xFFFF;
/// Sentinel stored in 32-bit fields whose real value lives in ZIP64 records
pub const ZIP64_U32: u32 = 0xFFFFFFFF;

/// Header ID of the ZIP64 extended information extra field
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// "Version needed to extract" for plain entries (2.0)
pub const VERSION_DEFAULT: u16 = 20;
/// "Version needed to extract" once ZIP64 fields are used (4.5)
pub const VERSION_ZIP64: u16 = 45;
/// Upper byte of "version made by": Unix
pub const MADE_BY_UNIX: u16 = 3 << 8;

/// General purpose flag: file name is UTF-8
pub const FLAG_UTF8: u16 = 0x0800;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid End of Central Directory");
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Build a single-disk record, saturating fields that overflow into
    /// the ZIP64 sentinels
    pub fn new(total_entries: u64, cd_size: u64, cd_offset: u64, comment_len: u16) -> Self {
        let entries = u16::try_from(total_entries)
            .ok()
            .filter(|n| *n != ZIP64_U16)
            .unwrap_or(ZIP64_U16);
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: saturate_u32(cd_size),
            cd_offset: saturate_u32(cd_offset),
            comment_len,
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(())
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_U16
            || self.total_entries == ZIP64_U16
            || self.cd_size == ZIP64_U32
            || self.cd_offset == ZIP64_U32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        out.write_u64::<LittleEndian>(self.eocd64_offset)?;
        out.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn new(total_entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            // Size of the remaining record, excluding signature and this field
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: MADE_BY_UNIX | VERSION_ZIP64,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u64::<LittleEndian>(self.eocd64_size)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u32::<LittleEndian>(self.disk_number)?;
        out.write_u32::<LittleEndian>(self.disk_with_cd)?;
        out.write_u64::<LittleEndian>(self.disk_entries)?;
        out.write_u64::<LittleEndian>(self.total_entries)?;
        out.write_u64::<LittleEndian>(self.cd_size)?;
        out.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

/// Central Directory File Header (CDFH) - 46 bytes plus name and extra
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";

/// Local File Header (LFH) - 30 bytes plus name and extra
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
}

/// Header fields shared by the local and central records of a new entry.
///
/// Sizes and offset are kept at full width; [`write_local`](Self::write_local)
/// and [`write_central`](Self::write_central) switch to ZIP64 extra fields
/// when a value does not fit the classic 32-bit slot.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub external_attrs: u32,
    /// Offset of the local header, relative to the start of the archive
    pub lfh_offset: u64,
}

impl EntryHeader {
    fn flags(&self) -> u16 {
        if self.file_name.is_ascii() { 0 } else { FLAG_UTF8 }
    }

    fn sizes_overflow(&self) -> bool {
        self.compressed_size >= ZIP64_U32 as u64 || self.uncompressed_size >= ZIP64_U32 as u64
    }

    fn offset_overflows(&self) -> bool {
        self.lfh_offset >= ZIP64_U32 as u64
    }

    fn version_needed(&self) -> u16 {
        if self.sizes_overflow() || self.offset_overflows() {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        }
    }

    pub fn write_local<W: Write>(&self, out: &mut W) -> Result<()> {
        let zip64 = self.sizes_overflow();
        let name = self.file_name.as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| anyhow::anyhow!("Entry name too long: {}", self.file_name))?;

        out.write_all(LFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_needed())?;
        out.write_u16::<LittleEndian>(self.flags())?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            out.write_u32::<LittleEndian>(ZIP64_U32)?;
            out.write_u32::<LittleEndian>(ZIP64_U32)?;
        } else {
            out.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            out.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        }
        out.write_u16::<LittleEndian>(name_len)?;
        out.write_u16::<LittleEndian>(if zip64 { 20 } else { 0 })?;
        out.write_all(name)?;
        if zip64 {
            // Local header carries both sizes, uncompressed first
            out.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            out.write_u16::<LittleEndian>(16)?;
            out.write_u64::<LittleEndian>(self.uncompressed_size)?;
            out.write_u64::<LittleEndian>(self.compressed_size)?;
        }
        Ok(())
    }

    pub fn write_central<W: Write>(&self, out: &mut W) -> Result<()> {
        let name = self.file_name.as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| anyhow::anyhow!("Entry name too long: {}", self.file_name))?;

        // Only the fields that overflow go into the extra block, in this order
        let mut extra = Vec::new();
        if self.uncompressed_size >= ZIP64_U32 as u64 {
            extra.write_u64::<LittleEndian>(self.uncompressed_size)?;
        }
        if self.compressed_size >= ZIP64_U32 as u64 {
            extra.write_u64::<LittleEndian>(self.compressed_size)?;
        }
        if self.offset_overflows() {
            extra.write_u64::<LittleEndian>(self.lfh_offset)?;
        }

        out.write_all(CDFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(MADE_BY_UNIX | self.version_needed())?;
        out.write_u16::<LittleEndian>(self.version_needed())?;
        out.write_u16::<LittleEndian>(self.flags())?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(saturate_u32(self.compressed_size))?;
        out.write_u32::<LittleEndian>(saturate_u32(self.uncompressed_size))?;
        out.write_u16::<LittleEndian>(name_len)?;
        let extra_len = if extra.is_empty() { 0 } else { extra.len() as u16 + 4 };
        out.write_u16::<LittleEndian>(extra_len)?;
        out.write_u16::<LittleEndian>(0)?; // comment length
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(0)?; // internal attributes
        out.write_u32::<LittleEndian>(self.external_attrs)?;
        out.write_u32::<LittleEndian>(saturate_u32(self.lfh_offset))?;
        out.write_all(name)?;
        if !extra.is_empty() {
            out.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            out.write_u16::<LittleEndian>(extra.len() as u16)?;
            out.write_all(&extra)?;
        }
        Ok(())
    }
}

fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value)
        .ok()
        .filter(|v| *v != ZIP64_U32)
        .unwrap_or(ZIP64_U32)
}

/// Encode a local timestamp as MS-DOS (time, date).
///
/// DOS dates cannot express anything before 1980, so earlier
/// timestamps clamp to 1980-01-01 00:00:00.
pub fn dos_datetime(timestamp: &NaiveDateTime) -> (u16, u16) {
    if timestamp.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let year = (timestamp.year().min(2107) - 1980) as u16;
    let date = (year << 9) | ((timestamp.month() as u16) << 5) | timestamp.day() as u16;
    let time = ((timestamp.hour() as u16) << 11)
        | ((timestamp.minute() as u16) << 5)
        | (timestamp.second() as u16 / 2);
    (time, date)
}
