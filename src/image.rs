//! Firmware image loading.
//!
//! Images are raw binaries unless the file extension says Intel HEX, in
//! which case the records are flattened from the lowest address with gaps
//! filled by `0xFF`.

use log::info;
use std::path::Path;

use crate::error::{Error, Result};

pub const GAP_FILL: u8 = 0xFF;
const MAX_IMAGE_SIZE: usize = 64 * 1024 * 1024;

pub async fn load(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let is_hex = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex"));

    let image = if is_hex {
        from_ihex(&tokio::fs::read_to_string(path).await?)?
    } else {
        tokio::fs::read(path).await?
    };
    info!("Loaded {} bytes from {}", image.len(), path.display());
    Ok(image)
}

pub fn from_ihex(text: &str) -> Result<Vec<u8>> {
    let mut base: usize = 0;
    let mut segments: Vec<(usize, Vec<u8>)> = Vec::new();

    for record in ihex::Reader::new(text) {
        match record? {
            ihex::Record::Data { offset, value } => {
                segments.push((base + usize::from(offset), value));
            }
            ihex::Record::ExtendedLinearAddress(upper) => base = usize::from(upper) << 16,
            ihex::Record::ExtendedSegmentAddress(segment) => base = usize::from(segment) << 4,
            ihex::Record::EndOfFile => break,
            _ => {}
        }
    }

    let start = segments
        .iter()
        .map(|(addr, _)| *addr)
        .min()
        .ok_or_else(|| Error::Configuration("HEX file contains no data".into()))?;
    let end = segments
        .iter()
        .map(|(addr, data)| addr + data.len())
        .max()
        .unwrap_or(start);
    if end - start > MAX_IMAGE_SIZE {
        return Err(Error::Configuration(format!(
            "HEX file spans {} bytes, more than the {} byte limit",
            end - start,
            MAX_IMAGE_SIZE
        )));
    }

    let mut image = vec![GAP_FILL; end - start];
    for (addr, data) in segments {
        image[addr - start..addr - start + data.len()].copy_from_slice(&data);
    }
    Ok(image)
}
