//! Uploaded scan images.
//!
//! Only local JPEG and PNG files are accepted. Validation happens before any
//! decoding work: empty and oversized uploads are rejected up front.

use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat};
use sha2::{Digest, Sha256};

use crate::error::{StoneError, StoneResult};

/// Default upload limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Raw bytes of one uploaded image plus what the client said about it.
#[derive(Clone, Debug)]
pub struct ImageInput {
    bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// A validated, decoded upload.
#[derive(Clone, Debug)]
pub struct DecodedInput {
    pub image: DynamicImage,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub filesize: u64,
    pub sha256: String,
}

impl DecodedInput {
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

impl ImageInput {
    pub fn from_bytes(bytes: Vec<u8>, filename: Option<String>) -> Self {
        Self { bytes, filename }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> StoneResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            StoneError::InvalidInput(format!("failed to read {}: {}", path.display(), e))
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self { bytes, filename })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check size and type, then decode.
    pub fn decode(&self, max_bytes: u64) -> StoneResult<DecodedInput> {
        if self.bytes.is_empty() {
            return Err(StoneError::InvalidInput("no file uploaded".to_string()));
        }
        if self.len() > max_bytes {
            return Err(StoneError::InvalidInput(format!(
                "file too large ({} bytes, maximum is {} bytes)",
                self.len(),
                max_bytes
            )));
        }
        let format = image::guess_format(&self.bytes)
            .map_err(|_| StoneError::InvalidInput("unrecognised image type".to_string()))?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(StoneError::InvalidInput(format!(
                "invalid file type {}; only JPEG and PNG images are accepted",
                format.to_mime_type()
            )));
        }
        let image = image::load_from_memory_with_format(&self.bytes, format)
            .map_err(|e| StoneError::InvalidInput(format!("invalid image: {}", e)))?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(StoneError::InvalidInput("image has no pixels".to_string()));
        }
        Ok(DecodedInput {
            image,
            format,
            width,
            height,
            filesize: self.len(),
            sha256: hex::encode(Sha256::digest(&self.bytes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn encoded(format: ImageFormat, w: u32, h: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([1, 2, 3])))
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_png_and_jpeg() {
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let input = ImageInput::from_bytes(encoded(format, 32, 16), Some("scan".into()));
            let decoded = input.decode(DEFAULT_MAX_UPLOAD_BYTES).unwrap();
            assert_eq!((decoded.width, decoded.height), (32, 16));
            assert_eq!(decoded.format, format);
            assert_eq!(decoded.sha256.len(), 64);
        }
    }

    #[test]
    fn rejects_empty_oversized_and_garbage() {
        let empty = ImageInput::from_bytes(Vec::new(), None);
        assert!(empty.decode(DEFAULT_MAX_UPLOAD_BYTES).unwrap_err().is_client_error());

        let png = encoded(ImageFormat::Png, 8, 8);
        let limit = png.len() as u64 - 1;
        let big = ImageInput::from_bytes(png, None);
        assert!(matches!(
            big.decode(limit),
            Err(StoneError::InvalidInput(msg)) if msg.contains("too large")
        ));

        let garbage = ImageInput::from_bytes(b"hello world".to_vec(), None);
        assert!(garbage.decode(DEFAULT_MAX_UPLOAD_BYTES).unwrap_err().is_client_error());
    }

    #[test]
    fn truncated_png_is_invalid_input() {
        let mut png = encoded(ImageFormat::Png, 16, 16);
        png.truncate(40);
        let input = ImageInput::from_bytes(png, None);
        assert!(matches!(
            input.decode(DEFAULT_MAX_UPLOAD_BYTES),
            Err(StoneError::InvalidInput(_))
        ));
    }
}
