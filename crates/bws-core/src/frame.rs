use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops, GrayImage, ImageFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("luminance buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported rotation: {0} degrees (expected a multiple of 90)")]
    UnsupportedRotation(u32),
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// 8-bit luminance image, row-major, no stride padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayscaleImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayscaleImage {
    /// Wrap a luminance buffer. `data.len()` must equal `width * height`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Image of uniform luminance.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_luma(img: GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Luminance at (x, y). Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: u8) {
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    fn to_luma(&self) -> GrayImage {
        // Length is checked at construction, so from_raw cannot fail.
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Rotate clockwise by `degrees` (0, 90, 180 or 270, modulo 360).
    pub fn rotate(&self, degrees: u32) -> Result<Self, ImageError> {
        let rotated = match degrees % 360 {
            0 => return Ok(self.clone()),
            90 => imageops::rotate90(&self.to_luma()),
            180 => imageops::rotate180(&self.to_luma()),
            270 => imageops::rotate270(&self.to_luma()),
            _ => return Err(ImageError::UnsupportedRotation(degrees)),
        };
        Ok(Self::from_luma(rotated))
    }

    /// Encode as an 8-bit grayscale PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, ImageError> {
        let mut buf = Vec::new();
        self.to_luma()
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// PNG wrapped as a `data:image/png;base64,...` URL, the upload body format.
    pub fn to_data_url(&self) -> Result<String, ImageError> {
        let png = self.to_png()?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
    }
}
