//! JPEG encoding policy for locally produced frames.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use crate::ProducerError;

/// Sensor rotation to undo before encoding, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }
}

/// Large frames get a lower quality to keep the per-frame size sane.
pub fn quality_for_width(width: u32) -> u8 {
    if width >= 2000 {
        40
    } else {
        60
    }
}

/// Rotate `image` as requested and encode it as a baseline JPEG. Quality is
/// chosen from the width before rotation.
pub fn encode_jpeg(image: RgbImage, rotation: Rotation) -> Result<Bytes, ProducerError> {
    let quality = quality_for_width(image.width());
    let image = match rotation {
        Rotation::None => image,
        Rotation::Cw90 => imageops::rotate90(&image),
        Rotation::Cw180 => imageops::rotate180(&image),
        Rotation::Cw270 => imageops::rotate270(&image),
    };

    let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&image)?;
    Ok(Bytes::from(jpeg))
}
