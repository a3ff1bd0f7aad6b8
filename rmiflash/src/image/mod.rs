//! Firmware image handling.
//!
//! - [`ImageBuffer`]: owned image bytes, zeroed on drop
//! - [`synaptics`]: Synaptics `.img` header and section layout

pub mod synaptics;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub use synaptics::{FirmwareImage, ImageHeader};

/// Raw firmware image held in memory for the duration of one flash run.
///
/// The bytes are overwritten with zeros when the buffer is dropped, whether
/// the run succeeded or not.
pub struct ImageBuffer {
    data: Zeroizing<Vec<u8>>,
}

impl ImageBuffer {
    /// Take ownership of `data`.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Zeroizing::new(data),
        }
    }

    /// Read a whole image file.
    ///
    /// The buffer is reserved up front; failure to allocate it is reported
    /// as [`Error::Allocation`] before any byte is read.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let mut file = File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| Error::Allocation(usize::MAX))?;

        let mut data = Zeroizing::new(Vec::new());
        data.try_reserve_exact(len).map_err(|_| Error::Allocation(len))?;
        file.read_to_end(&mut data)?;

        debug!("Loaded {} bytes", data.len());
        Ok(Self { data })
    }

    /// Image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}
