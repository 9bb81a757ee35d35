//! PNG masks for single 2D planes.
//!
//! Label values are stored as 16-bit grayscale; binary masks as 8-bit
//! grayscale with 255 for "on". Pixel `(x, y)` maps to voxel `[x, y, 0]`.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma};

use crate::model::Dimensions;
use crate::segmentation::CodecError;
use crate::segmentation::codec::{MaskCodec, MaskImage};
use crate::segmentation::labels::{LabelVolume, label_dimensions};

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Value written for "on" pixels of a binary PNG mask.
const BINARY_ON: u8 = 255;

/// PNG mask codec.
pub struct PngCodec;

impl MaskCodec for PngCodec {
    fn id(&self) -> &'static str {
        "png"
    }

    fn display_name(&self) -> &'static str {
        "PNG Mask"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png"]
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        data.starts_with(&PNG_MAGIC)
    }

    fn decode(&self, data: &[u8]) -> Result<MaskImage, CodecError> {
        let img = image::load_from_memory_with_format(data, ImageFormat::Png)
            .map_err(|e| CodecError::corrupt(format!("Failed to decode PNG: {e}")))?;
        let (width, height) = (img.width() as usize, img.height() as usize);
        let mut labels = LabelVolume::zeros((width, height, 1));

        match &img {
            DynamicImage::ImageLuma8(gray) => {
                for (x, y, pixel) in gray.enumerate_pixels() {
                    labels[[x as usize, y as usize, 0]] = u16::from(pixel[0]);
                }
            }
            DynamicImage::ImageLuma16(gray) => {
                for (x, y, pixel) in gray.enumerate_pixels() {
                    labels[[x as usize, y as usize, 0]] = pixel[0];
                }
            }
            DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_) => {
                // Colour masks: the brightest channel, so grey stays exact and
                // any coloured pixel counts as set.
                let rgb = img.to_rgb8();
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    let value = pixel.0.into_iter().max().unwrap_or(0);
                    labels[[x as usize, y as usize, 0]] = u16::from(value);
                }
            }
            DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_) => {
                let rgb = img.to_rgb16();
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    labels[[x as usize, y as usize, 0]] = pixel.0.into_iter().max().unwrap_or(0);
                }
            }
            other => {
                return Err(CodecError::corrupt(format!(
                    "unsupported PNG pixel type {:?}",
                    other.color()
                )));
            }
        }

        log::trace!("PngCodec: decoded {width}x{height} mask");
        Ok(MaskImage::new(labels))
    }

    fn encode(&self, image: &MaskImage, binary: bool) -> Result<Vec<u8>, CodecError> {
        let dims = label_dimensions(&image.labels);
        if !dims.is_planar() {
            return Err(CodecError::ShapeMismatch {
                expected: Dimensions::image(dims.width, dims.height),
                actual: dims,
            });
        }
        let width = u32::try_from(dims.width)
            .map_err(|_| CodecError::Unsupported(format!("PNG width {}", dims.width)))?;
        let height = u32::try_from(dims.height)
            .map_err(|_| CodecError::Unsupported(format!("PNG height {}", dims.height)))?;
        let labels = &image.labels;

        let dynamic = if binary {
            DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
                let on = labels[[x as usize, y as usize, 0]] != 0;
                Luma([if on { BINARY_ON } else { 0 }])
            }))
        } else {
            DynamicImage::ImageLuma16(ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(
                width,
                height,
                |x, y| Luma([labels[[x as usize, y as usize, 0]]]),
            ))
        };

        let mut bytes = Vec::new();
        dynamic
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| CodecError::corrupt(format!("Failed to encode PNG: {e}")))?;
        Ok(bytes)
    }

    fn supports_volumes(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_values_survive() {
        let mut labels = LabelVolume::zeros((5, 3, 1));
        labels[[4, 0, 0]] = 1;
        labels[[0, 2, 0]] = 1000;
        let codec = PngCodec;
        let bytes = codec.encode(&MaskImage::new(labels.clone()), false).unwrap();
        assert!(codec.can_decode(&bytes));
        assert_eq!(codec.decode(&bytes).unwrap().labels, labels);
    }

    #[test]
    fn test_binary_mask_is_white() {
        let mut labels = LabelVolume::zeros((2, 2, 1));
        labels[[1, 1, 0]] = 7;
        let bytes = PngCodec.encode(&MaskImage::new(labels), true).unwrap();
        let decoded = PngCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.labels[[1, 1, 0]], 255);
        assert_eq!(decoded.labels[[0, 0, 0]], 0);
    }

    #[test]
    fn test_volume_rejected() {
        let labels = LabelVolume::zeros((2, 2, 3));
        let err = PngCodec.encode(&MaskImage::new(labels), false).unwrap_err();
        assert!(matches!(err, CodecError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rgb_mask_uses_brightest_channel() {
        let mut rgb = image::RgbImage::new(2, 1);
        rgb.put_pixel(1, 0, image::Rgb([0, 200, 0]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let decoded = PngCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.labels[[1, 0, 0]], 200);
        assert_eq!(decoded.labels[[0, 0, 0]], 0);
    }
}
