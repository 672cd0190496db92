use std::io::Read;

use anyhow::{anyhow, Context, Result};
use byteorder::{ReadBytesExt, LE};

use super::FileCompression;

impl From<u16> for FileCompression {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Store,
            8 => Self::Deflate,
            other => Self::Unsupported(other),
        }
    }
}

// ZIP end of central directory record
#[derive(Clone, Debug)]
pub struct EndOfCentDir {
    pub cent_dir_records: u16,
    pub cent_dir_offset: u32,
}

// The parts of a central directory record needed to locate and read an entry.
#[derive(Clone, Debug)]
pub struct CentDirHeader {
    pub flags: u16,
    pub crc32: u32,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
    pub local_header_offset: u32,
    pub file_name: String,
}

// ZIP local file header record. Only the variable length fields matter for reading,
// as the central directory is authoritative for lengths and CRC.
#[derive(Clone, Debug)]
pub struct LocalFileHeader {
    pub compression_method: FileCompression,
    pub file_name_len: u16,
    pub extra_field_len: u16,
}

impl EndOfCentDir {
    pub const HEADER: u32 = 0x06054b50;
    pub const MIN_SIZE: u64 = 22;
    pub const COMMENT_LENGTH_FIELD_OFFSET: u64 = 20;

    pub fn read(data: &mut impl Read) -> Result<Self> {
        if data.read_u32::<LE>()? != Self::HEADER {
            return Err(anyhow!("Invalid EOCD header"));
        }

        let disk_num = data.read_u16::<LE>()?;
        let start_of_cd_disk = data.read_u16::<LE>()?;
        let cd_records_on_disk = data.read_u16::<LE>()?;
        let cent_dir_records = data.read_u16::<LE>()?;
        let _cent_dir_size = data.read_u32::<LE>()?;
        let cent_dir_offset = data.read_u32::<LE>()?;

        if cent_dir_records != cd_records_on_disk || start_of_cd_disk != 0 || disk_num != 0 {
            return Err(anyhow!("Multi-disk archives are not supported"));
        }

        Ok(Self {
            cent_dir_records,
            cent_dir_offset,
        })
    }
}

impl CentDirHeader {
    pub const HEADER: u32 = 0x02014b50;

    pub fn read(data: &mut impl Read) -> Result<Self> {
        if data.read_u32::<LE>()? != Self::HEADER {
            return Err(anyhow!("Invalid CD header signature"));
        }

        let _version_made_by = data.read_u16::<LE>()?;
        let _version_needed = data.read_u16::<LE>()?;
        let flags = data.read_u16::<LE>()?;
        // The local header's method is the one used for decoding.
        let _compression_method = data.read_u16::<LE>()?;
        let _last_modified = data.read_u32::<LE>()?;
        let crc32 = data.read_u32::<LE>()?;
        let compressed_len = data.read_u32::<LE>()?;
        let uncompressed_len = data.read_u32::<LE>()?;

        let file_name_len = data.read_u16::<LE>()? as usize;
        let extra_field_len = data.read_u16::<LE>()? as usize;
        let comment_len = data.read_u16::<LE>()? as usize;

        if data.read_u16::<LE>()? != 0 {
            return Err(anyhow!("Multi-disk archives are not supported"));
        }

        let _internal_attrs = data.read_u16::<LE>()?;
        let _external_attrs = data.read_u32::<LE>()?;
        let local_header_offset = data.read_u32::<LE>()?;

        let mut file_name_buf = vec![0u8; file_name_len];
        data.read_exact(&mut file_name_buf)?;
        // Extra field and comment are not needed, skip past them.
        std::io::copy(
            &mut data.take((extra_field_len + comment_len) as u64),
            &mut std::io::sink(),
        )?;

        Ok(Self {
            flags,
            crc32,
            compressed_len,
            uncompressed_len,
            local_header_offset,
            // NB: Strictly speaking this should be converted to code page 437
            // ...but bundle entry names are UTF-8 in practice.
            file_name: String::from_utf8(file_name_buf).context("File name was not valid UTF-8")?,
        })
    }

    /// True if bit 0 of the general purpose flags is set.
    pub fn is_encrypted(&self) -> bool {
        self.flags & 1 != 0
    }
}

impl LocalFileHeader {
    pub const HEADER: u32 = 0x04034b50;
    // Size of the fixed portion of the header, before the file name.
    pub const FIXED_SIZE: u64 = 30;

    pub fn read(data: &mut impl Read) -> Result<Self> {
        if data.read_u32::<LE>()? != Self::HEADER {
            return Err(anyhow!("Invalid LFH header signature"));
        }

        let _version_needed = data.read_u16::<LE>()?;
        let _flags = data.read_u16::<LE>()?;
        let compression_method = FileCompression::from(data.read_u16::<LE>()?);
        let _last_modified = data.read_u32::<LE>()?;
        let _crc32 = data.read_u32::<LE>()?;
        let _compressed_len = data.read_u32::<LE>()?;
        let _uncompressed_len = data.read_u32::<LE>()?;
        let file_name_len = data.read_u16::<LE>()?;
        let extra_field_len = data.read_u16::<LE>()?;

        Ok(Self {
            compression_method,
            file_name_len,
            extra_field_len,
        })
    }

    /// Offset from the start of this header to the first byte of entry data.
    pub fn data_offset(&self) -> u64 {
        Self::FIXED_SIZE + self.file_name_len as u64 + self.extra_field_len as u64
    }
}
