//! Synaptics `.img` reflash image.
//!
//! ## Layout
//!
//! ```text
//! 0x0000 +---------------------------+
//!        | header                    |  0x07 format version
//!        |                           |  0x08 firmware size (LE32)
//!        |                           |  0x10 product ID (6 bytes)
//!        |                           |  0x1E lockdown flag
//!        |                           |  0x40 display config offset (LE32)
//!        | lockdown data             |  0xB0 / 0xC0 / 0xD0
//! 0x0100 +---------------------------+
//!        | firmware                  |
//!        +---------------------------+  0x100 + firmware size
//!        | UI config                 |
//!        +---------------------------+
//!        | ...                       |
//!        +---------------------------+  display config offset
//!        | display config            |
//!        +---------------------------+
//! ```
//!
//! The image version string sits at `0x11100` when the image is long
//! enough to hold it.
//!
//! Section lengths are not recorded in the image; they come from the
//! device's block geometry at flash time.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::ImageBuffer;
use crate::error::{Error, Result};
use crate::protocol::f34::{FlashGeometry, Partition};

/// Size of the header area; the firmware section starts here.
pub const HEADER_SIZE: usize = 0x100;

/// Offset of the firmware section.
pub const FIRMWARE_OFFSET: usize = HEADER_SIZE;

/// Product ID length in the image header.
pub const PRODUCT_ID_LEN: usize = 6;

/// Image version string length.
pub const IMAGE_VERSION_LEN: usize = 4;

const FORMAT_VERSION_OFFSET: usize = 0x07;
const FIRMWARE_SIZE_OFFSET: usize = 0x08;
const PRODUCT_ID_OFFSET: usize = 0x10;
const LOCKDOWN_FLAG_OFFSET: usize = 0x1E;
const DISPLAY_CONFIG_OFFSET: usize = 0x40;
const IMAGE_VERSION_OFFSET: usize = 0x11100;

/// Start of the lockdown data for an image format version.
pub fn lockdown_offset(format_version: u8) -> Option<usize> {
    match format_version {
        2 => Some(0xD0),
        3 | 4 => Some(0xC0),
        5 | 6 => Some(0xB0),
        _ => None,
    }
}

/// Number of lockdown blocks for an image format version.
pub fn lockdown_block_count(format_version: u8) -> u16 {
    match format_version {
        2 => 3,
        3 | 4 => 4,
        5 | 6 => 5,
        _ => 0,
    }
}

/// Fields decoded from the image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Image format version.
    pub format_version: u8,
    /// Firmware section size in bytes.
    pub firmware_size: u32,
    /// Product ID the image was built for.
    pub product_id: String,
    /// Image version string, if the image is long enough to carry one.
    pub image_version: Option<String>,
    /// Lockdown flag; zero means lockdown is skipped.
    pub lockdown_flag: u8,
    /// Offset of the display config section.
    pub display_config_offset: u32,
}

impl ImageHeader {
    /// Offset of the lockdown data, if this format version has one.
    pub fn lockdown_offset(&self) -> Option<usize> {
        lockdown_offset(self.format_version)
    }

    /// Number of lockdown blocks for this format version.
    pub fn lockdown_block_count(&self) -> u16 {
        lockdown_block_count(self.format_version)
    }

    /// Offset of the UI config section.
    pub fn config_offset(&self) -> usize {
        FIRMWARE_OFFSET + self.firmware_size as usize
    }

    /// Offset of `partition` in the image.
    pub fn section_offset(&self, partition: Partition) -> usize {
        match partition {
            Partition::Firmware => FIRMWARE_OFFSET,
            Partition::Config => self.config_offset(),
            Partition::DisplayConfig => self.display_config_offset as usize,
        }
    }
}

/// A parsed image. Owns its buffer, which is zeroed when this is dropped.
#[derive(Debug)]
pub struct FirmwareImage {
    buffer: ImageBuffer,
    header: ImageHeader,
}

impl FirmwareImage {
    /// Parse the header and check that the section offsets lie inside the
    /// buffer.
    ///
    /// An unknown format version is not an error: the image simply has no
    /// lockdown section.
    pub fn parse(buffer: ImageBuffer) -> Result<Self> {
        let data = buffer.as_bytes();
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidImage(format!(
                "image is {} bytes, shorter than its {HEADER_SIZE}-byte header",
                data.len()
            )));
        }

        let header = ImageHeader {
            format_version: data[FORMAT_VERSION_OFFSET],
            firmware_size: LittleEndian::read_u32(&data[FIRMWARE_SIZE_OFFSET..]),
            product_id: text_field(&data[PRODUCT_ID_OFFSET..PRODUCT_ID_OFFSET + PRODUCT_ID_LEN]),
            image_version: data
                .get(IMAGE_VERSION_OFFSET..IMAGE_VERSION_OFFSET + IMAGE_VERSION_LEN)
                .map(text_field),
            lockdown_flag: data[LOCKDOWN_FLAG_OFFSET],
            display_config_offset: LittleEndian::read_u32(&data[DISPLAY_CONFIG_OFFSET..]),
        };

        let config_offset = FIRMWARE_OFFSET
            .checked_add(header.firmware_size as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::InvalidImage(format!(
                    "firmware size {:#x} runs past the end of a {}-byte image",
                    header.firmware_size,
                    data.len()
                ))
            })?;

        if header.display_config_offset as usize > data.len() {
            return Err(Error::InvalidImage(format!(
                "display config offset {:#x} is past the end of a {}-byte image",
                header.display_config_offset,
                data.len()
            )));
        }

        debug!(
            "Image v{}: product {:?}, firmware {} bytes, config at {:#x}, display config at {:#x}",
            header.format_version,
            header.product_id,
            header.firmware_size,
            config_offset,
            header.display_config_offset
        );
        if header.lockdown_offset().is_none() {
            debug!(
                "No lockdown section for format version {}",
                header.format_version
            );
        }

        Ok(Self { buffer, header })
    }

    /// Parsed header.
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Whole image.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// The bytes of `partition` for the given geometry.
    pub fn section(&self, partition: Partition, geometry: &FlashGeometry) -> Result<&[u8]> {
        let offset = self.header.section_offset(partition);
        let len = geometry.partition_len(partition);
        self.slice(offset, len).ok_or_else(|| {
            Error::InvalidImage(format!(
                "{} section needs {len} bytes at {offset:#x}, image has {}",
                partition.name(),
                self.buffer.len()
            ))
        })
    }

    /// Lockdown data, or `None` when lockdown is skipped for this image.
    pub fn lockdown_data(&self, block_size: u16) -> Result<Option<&[u8]>> {
        if self.header.lockdown_flag == 0 {
            return Ok(None);
        }
        let Some(offset) = self.header.lockdown_offset() else {
            return Ok(None);
        };

        let len = usize::from(self.header.lockdown_block_count()) * usize::from(block_size);
        self.slice(offset, len).map(Some).ok_or_else(|| {
            Error::InvalidImage(format!(
                "lockdown data needs {len} bytes at {offset:#x}, image has {}",
                self.buffer.len()
            ))
        })
    }

    /// Check that every partition in `partitions` fits the device geometry.
    pub fn check_geometry(&self, geometry: &FlashGeometry, partitions: &[Partition]) -> Result<()> {
        for &partition in partitions {
            self.section(partition, geometry)?;
        }
        self.lockdown_data(geometry.block_size)?;
        Ok(())
    }

    fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.buffer.as_bytes().get(offset..end)
    }
}

/// NUL-terminated ASCII field.
fn text_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).to_string()
}
