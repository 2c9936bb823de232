use chrono::NaiveDateTime;
use flate2::Crc;
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::io::{LocalFileReader, ReadAt};
use anyhow::{Context, Result};

use super::parser::ZipParser;
use super::structures::*;

/// Unix permission bits recorded on appended entries (rw-------)
const DEFAULT_FILE_MODE: u32 = 0o600;

/// Adds entries to an existing ZIP file without touching existing ones.
///
/// New entries are STORED. Their local headers and data are written where
/// the old Central Directory began, followed by the old central records
/// (byte for byte), the new central records and fresh end records. A file that is not a ZIP archive
/// gets a new archive appended after its current contents.
///
/// Nothing reaches the disk until [`finish`](Self::finish); dropping the
/// appender leaves the file untouched.
pub struct ZipAppender {
    path: PathBuf,
    /// Absolute position where new local headers start
    write_start: u64,
    /// Bytes before the archive proper; stored offsets exclude them
    prefix_len: u64,
    existing_cd: Vec<u8>,
    existing_entries: u64,
    /// Names already in the archive or queued
    names: HashSet<String>,
    comment: Vec<u8>,
    zip64: bool,
    /// Pending local headers and entry data
    local: Vec<u8>,
    /// Pending central records
    headers: Vec<EntryHeader>,
}

impl ZipAppender {
    /// Open `path` for appending.
    pub async fn open(path: &Path) -> Result<Self> {
        let reader = Arc::new(LocalFileReader::new(path)?);
        let size = reader.size();
        let parser = ZipParser::new(reader);

        let appender = match parser.locate_central_directory().await? {
            Some(cd) => {
                let existing_cd = parser
                    .read_central_directory(&cd)
                    .await
                    .with_context(|| format!("Failed to read central directory of {}", path.display()))?;
                let names = parser
                    .parse_entries(&cd, &existing_cd)
                    .with_context(|| format!("Corrupt central directory in {}", path.display()))?
                    .into_iter()
                    .map(|entry| entry.file_name)
                    .collect::<HashSet<_>>();
                log::debug!(
                    "{}: {} entries, central directory at {} ({} bytes), {} prefix bytes",
                    path.display(),
                    cd.total_entries,
                    cd.start,
                    cd.size,
                    cd.prefix_len
                );
                Self {
                    path: path.to_path_buf(),
                    write_start: cd.start,
                    prefix_len: cd.prefix_len,
                    existing_cd,
                    existing_entries: cd.total_entries,
                    names,
                    comment: cd.comment,
                    zip64: cd.zip64,
                    local: Vec::new(),
                    headers: Vec::new(),
                }
            }
            None => {
                log::warn!(
                    "{} is not a ZIP archive, starting a new one after its {} bytes",
                    path.display(),
                    size
                );
                Self {
                    path: path.to_path_buf(),
                    write_start: size,
                    prefix_len: 0,
                    existing_cd: Vec::new(),
                    existing_entries: 0,
                    names: HashSet::new(),
                    comment: Vec::new(),
                    zip64: false,
                    local: Vec::new(),
                    headers: Vec::new(),
                }
            }
        };

        Ok(appender)
    }

    /// Number of entries the archive will hold after [`finish`](Self::finish)
    pub fn total_entries(&self) -> u64 {
        self.existing_entries + self.headers.len() as u64
    }

    /// Queue a new STORED entry.
    ///
    /// A name that is already taken is still added, so the archive ends up
    /// with two records of that name.
    pub fn add_entry(&mut self, name: &str, data: &[u8], modified: NaiveDateTime) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            log::warn!("Duplicate name {} in {}", name, self.path.display());
        }

        let mut crc = Crc::new();
        crc.update(data);

        let (last_mod_time, last_mod_date) = dos_datetime(&modified);
        let header = EntryHeader {
            file_name: name.to_string(),
            compression_method: CompressionMethod::Stored,
            crc32: crc.sum(),
            compressed_size: data.len() as u64,
            uncompressed_size: data.len() as u64,
            last_mod_time,
            last_mod_date,
            external_attrs: DEFAULT_FILE_MODE << 16,
            lfh_offset: self.write_start + self.local.len() as u64 - self.prefix_len,
        };

        header.write_local(&mut self.local)?;
        self.local.extend_from_slice(data);
        log::debug!("Queued {} ({} bytes)", name, data.len());
        self.headers.push(header);
        Ok(())
    }

    /// Write queued entries and the new archive tail.
    ///
    /// Returns the total number of entries in the archive.
    pub async fn finish(self) -> Result<u64> {
        let total_entries = self.total_entries();
        let mut tail = self.local;

        let local_len = tail.len();
        let cd_offset = self.write_start + local_len as u64 - self.prefix_len;
        tail.extend_from_slice(&self.existing_cd);
        for header in &self.headers {
            header.write_central(&mut tail)?;
        }
        let cd_size = (tail.len() - local_len) as u64;

        let needs_zip64 = self.zip64
            || total_entries >= ZIP64_U16 as u64
            || cd_size >= ZIP64_U32 as u64
            || cd_offset >= ZIP64_U32 as u64;
        if needs_zip64 {
            let eocd64_offset = cd_offset + cd_size;
            Zip64EOCD::new(total_entries, cd_size, cd_offset).write_to(&mut tail)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write_to(&mut tail)?;
        }

        let comment_len = self.comment.len().min(u16::MAX as usize);
        let eocd = if needs_zip64 {
            // Readers must go to the ZIP64 record for every field
            EndOfCentralDirectory::new(
                ZIP64_U16 as u64,
                ZIP64_U32 as u64,
                ZIP64_U32 as u64,
                comment_len as u16,
            )
        } else {
            EndOfCentralDirectory::new(total_entries, cd_size, cd_offset, comment_len as u16)
        };
        eocd.write_to(&mut tail)?;
        tail.extend_from_slice(&self.comment[..comment_len]);

        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
        file.seek(SeekFrom::Start(self.write_start)).await?;
        file.write_all(&tail).await?;
        file.flush().await?;
        file.set_len(self.write_start + tail.len() as u64).await?;
        file.sync_all().await?;

        log::debug!(
            "Wrote {} bytes to {} at offset {}, {} entries total",
            tail.len(),
            self.path.display(),
            self.write_start,
            total_entries
        );
        Ok(total_entries)
    }
}
