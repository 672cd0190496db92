//! Minimal ZIP reader used to inspect and unpack downloaded packages and bundles.
//! Only single-disk archives using STORE or DEFLATE are supported, which covers every
//! APK, APKM, APKS and XAPK seen in practice.

use anyhow::{anyhow, Context, Result};
use byteorder::{ReadBytesExt, LE};
use crc::Crc;
use libflate::deflate;
use std::{
    collections::BTreeMap,
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Component, Path},
};

use self::data::{CentDirHeader, EndOfCentDir, LocalFileHeader};

mod data;

// Max size of the archive comment
pub const UINT16_MAX_VALUE: u16 = 0xffff;

/// The CRC-32 algorithm used by the ZIP file format.
pub const ZIP_CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

// The compression method of a file within the archive, which may be an unsupported method.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileCompression {
    Deflate,
    Store,
    Unsupported(u16),
}

// Passes writes through to `inner` while hashing them, so extracted data can be checked
// against the CRC recorded in the central directory.
struct CrcWriter<'c, W: Write> {
    inner: W,
    digest: crc::Digest<'c, u32>,
    written: u64,
}

impl<W: Write> Write for CrcWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.digest.update(&buf[..count]);
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

pub struct ZipFile<T: Read + Seek> {
    file: T,
    // Sorted by name so that listing and extraction order is stable.
    entries: BTreeMap<String, CentDirHeader>,
}

// Searches backwards from the end of the archive for the end of central directory record.
// The record is followed by a variable length comment, so each possible comment length is tried
// and the candidate is only accepted if its comment length field agrees.
fn find_eocd(reader: &mut (impl Read + Seek)) -> Result<u64> {
    let archive_size = reader.seek(SeekFrom::End(0))?;
    if archive_size < EndOfCentDir::MIN_SIZE {
        return Err(anyhow!("File too small to be a valid ZIP archive"));
    }

    let empty_comment_pos = archive_size - EndOfCentDir::MIN_SIZE;
    let max_comment_len = empty_comment_pos.min(UINT16_MAX_VALUE as u64);

    for comment_len in 0..=max_comment_len {
        let eocd_pos = empty_comment_pos - comment_len;
        reader.seek(SeekFrom::Start(eocd_pos))?;
        if reader.read_u32::<LE>()? != EndOfCentDir::HEADER {
            continue;
        }

        reader.seek(SeekFrom::Start(eocd_pos + EndOfCentDir::COMMENT_LENGTH_FIELD_OFFSET))?;
        if reader.read_u16::<LE>()? as u64 == comment_len {
            return Ok(eocd_pos);
        }
    }

    Err(anyhow!("No end of central directory found"))
}

impl<T: Read + Seek> ZipFile<T> {
    /// Opens a ZIP archive from a readable stream.
    /// Fails if the stream does not contain a readable central directory.
    pub fn open(mut file: T) -> Result<Self> {
        let mut buf_file = BufReader::new(&mut file);

        let eocd_pos = find_eocd(&mut buf_file)?;
        buf_file.seek(SeekFrom::Start(eocd_pos))?;
        let eocd = EndOfCentDir::read(&mut buf_file).context("Invalid EOCD")?;

        buf_file.seek(SeekFrom::Start(eocd.cent_dir_offset as u64))?;
        let mut entries = BTreeMap::new();
        for _ in 0..eocd.cent_dir_records {
            let cd_record = CentDirHeader::read(&mut buf_file).context("Invalid CD file header")?;
            entries.insert(cd_record.file_name.clone(), cd_record);
        }

        drop(buf_file);
        Ok(Self { file, entries })
    }

    /// Returns an iterator over the entry names within the ZIP file, in name order.
    pub fn iter_entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_ref)
    }

    /// Reads the contents of entry with full name `name` and writes them to `write_to`.
    /// Gives an Err if the file does not exist, uses an unsupported compression method,
    /// is encrypted, or its data does not match the recorded length and CRC-32.
    pub fn read_file_contents(&mut self, name: &str, write_to: &mut impl Write) -> Result<()> {
        let cd_header = self
            .entries
            .get(name)
            .ok_or_else(|| anyhow!("File with name {name} did not exist"))?;
        if cd_header.is_encrypted() {
            return Err(anyhow!("Entry {name} is encrypted"));
        }

        let mut buf_reader = BufReader::new(&mut self.file);
        buf_reader.seek(SeekFrom::Start(cd_header.local_header_offset as u64))?;
        let lfh = LocalFileHeader::read(&mut buf_reader).context("Invalid local file header")?;
        buf_reader.seek(SeekFrom::Start(
            cd_header.local_header_offset as u64 + lfh.data_offset(),
        ))?;

        // Use CDH for compressed length as LFH may have it set to 0 if this archive uses data descriptors.
        let mut compressed_contents = (&mut buf_reader).take(cd_header.compressed_len as u64);
        let mut writer = CrcWriter {
            inner: write_to,
            digest: ZIP_CRC.digest(),
            written: 0,
        };

        match lfh.compression_method {
            FileCompression::Deflate => {
                let mut decoder = deflate::Decoder::new(compressed_contents);
                std::io::copy(&mut decoder, &mut writer)?;
            }
            FileCompression::Store => {
                std::io::copy(&mut compressed_contents, &mut writer)?;
            }
            FileCompression::Unsupported(method) => {
                return Err(anyhow!(
                    "Compression method `{method}` not supported for reading"
                ))
            }
        };

        if writer.written != cd_header.uncompressed_len as u64 {
            return Err(anyhow!(
                "Entry {name} had length {} but {} was expected",
                writer.written,
                cd_header.uncompressed_len
            ));
        }

        let actual_crc = writer.digest.finalize();
        if actual_crc != cd_header.crc32 {
            return Err(anyhow!(
                "CRC-32 mismatch for {name}: got {actual_crc:08x}, expected {:08x}",
                cd_header.crc32
            ));
        }

        Ok(())
    }

    /// Extracts a file from the ZIP to a particular path.
    pub fn extract_file_to(&mut self, name: &str, to: impl AsRef<Path>) -> Result<()> {
        let mut handle = std::fs::OpenOptions::new()
            .truncate(true)
            .create(true)
            .write(true)
            .open(to)
            .context("Creating extracted file")?;

        self.read_file_contents(name, &mut handle)
    }

    /// Extracts all of the files in the ZIP file to the given directory.
    /// Entries whose names would escape `to` (absolute paths, `..`) are rejected.
    pub fn extract_to_directory(&mut self, to: impl AsRef<Path>) -> Result<()> {
        let to = to.as_ref();

        let names = self.entries.keys().cloned().collect::<Vec<_>>();
        for entry_name in names {
            if !is_safe_entry_name(&entry_name) {
                return Err(anyhow!("Refusing to extract unsafe entry name {entry_name}"));
            }

            let extract_path = to.join(&entry_name);
            if entry_name.ends_with('/') {
                std::fs::create_dir_all(&extract_path)
                    .context("Creating directory entry from ZIP")?;
                continue;
            }

            if let Some(parent) = extract_path.parent() {
                std::fs::create_dir_all(parent)
                    .context("Creating directory to extract ZIP file")?;
            }

            self.extract_file_to(&entry_name, &extract_path)
                .with_context(|| format!("Extracting {entry_name}"))?;
        }

        Ok(())
    }
}

// An entry name is safe to join onto a directory if it is relative and only descends.
fn is_safe_entry_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('\\')
        && Path::new(name)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}
