//! Subject image discovery and re-compression.
//!
//! Images are matched by file-name prefix (`Patient7_1.jpg`, `Patient7_2.png`),
//! shrunk to fit a bounding box and re-encoded as JPEG so a whole image set
//! can be sent inline with one request.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use thiserror::Error;

/// Longest edge after re-compression.
pub const MAX_DIMENSION: u32 = 1024;
/// JPEG quality used for re-compression.
pub const JPEG_QUALITY: u8 = 85;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode jpeg: {0}")]
    Encode(#[from] image::ImageError),
}

/// Compressed image ready for inline transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    mime_type: &'static str,
    bytes: Arc<[u8]>,
}

impl ImagePayload {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "image/jpeg",
            bytes: bytes.into(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:` URL for OpenAI-style `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// Shrinks and re-encodes images.
#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }
}

impl ImageEncoder {
    pub fn encode_file(&self, path: &Path) -> Result<ImagePayload, ImageError> {
        let raw = fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let img = image::load_from_memory(&raw).map_err(|source| ImageError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        self.encode_image(img)
    }

    /// Fit within `max_dimension` (never upscaling), flatten to RGB, encode JPEG.
    pub fn encode_image(&self, img: DynamicImage) -> Result<ImagePayload, ImageError> {
        let bound = self.max_dimension.max(1);
        let img = if img.width() > bound || img.height() > bound {
            img.thumbnail(bound, bound)
        } else {
            img
        };
        let rgb = img.to_rgb8();

        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality.clamp(1, 100));
            encoder.encode_image(&rgb)?;
        }
        Ok(ImagePayload::jpeg(buf.into_inner()))
    }
}

/// Image directory with the file-name convention used to match subjects.
#[derive(Debug, Clone)]
pub struct ImageLibrary {
    dir: PathBuf,
    prefix: String,
    encoder: ImageEncoder,
}

impl ImageLibrary {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            encoder: ImageEncoder::default(),
        }
    }

    pub fn with_encoder(mut self, encoder: ImageEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Image files for a subject, sorted by file name.
    pub fn find(&self, subject_id: &str) -> Result<Vec<PathBuf>, ImageError> {
        find_subject_images(&self.dir, &self.prefix, subject_id)
    }

    /// Encode every image in `paths`, failing on the first bad file.
    pub fn encode_all(&self, paths: &[PathBuf]) -> Result<Vec<ImagePayload>, ImageError> {
        paths.iter().map(|p| self.encoder.encode_file(p)).collect()
    }
}

/// Files in `dir` named `{prefix}{subject_id}_*` with an image extension.
pub fn find_subject_images(
    dir: &Path,
    prefix: &str,
    subject_id: &str,
) -> Result<Vec<PathBuf>, ImageError> {
    let stem = format!("{prefix}{subject_id}_");
    let entries = fs::read_dir(dir).map_err(|source| ImageError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ImageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&stem) || !has_image_extension(name) {
            continue;
        }
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            matches.push(entry.path());
        }
    }

    matches.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(matches)
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, image::Rgb([120, 40, 200]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn finds_only_matching_subject_images_in_name_order() {
        let dir = tempdir().unwrap();
        for name in [
            "Patient7_2.png",
            "Patient7_1.JPG",
            "Patient70_1.jpg",
            "Patient7_notes.txt",
            "Patient8_1.jpg",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let found = find_subject_images(dir.path(), "Patient", "7").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Patient7_1.JPG", "Patient7_2.png"]);
    }

    #[test]
    fn no_matches_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let found = find_subject_images(dir.path(), "Patient", "3").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let err = find_subject_images(&dir.path().join("nope"), "Patient", "3").unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }

    #[test]
    fn large_images_are_shrunk_to_bound_keeping_aspect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Patient1_1.png");
        write_png(&path, 2048, 1024);

        let payload = ImageEncoder::default().encode_file(&path).unwrap();
        assert_eq!(payload.mime_type(), "image/jpeg");
        assert_eq!(&payload.bytes()[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(payload.bytes()).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 512));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(300, 200));
        let payload = ImageEncoder::default().encode_image(img).unwrap();
        let decoded = image::load_from_memory(payload.bytes()).unwrap();
        assert_eq!(decoded.dimensions(), (300, 200));
    }

    #[test]
    fn undecodable_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Patient1_1.jpg");
        fs::write(&path, b"not an image").unwrap();

        let err = ImageEncoder::default().encode_file(&path).unwrap_err();
        assert!(err.to_string().contains("Patient1_1.jpg"));
    }

    #[test]
    fn data_url_has_mime_prefix() {
        let payload = ImagePayload::jpeg(vec![1, 2, 3]);
        assert_eq!(payload.data_url(), "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn library_encodes_all_found_images() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("Case4_a.png"), 10, 10);
        write_png(&dir.path().join("Case4_b.png"), 10, 10);

        let lib = ImageLibrary::new(dir.path(), "Case");
        let paths = lib.find("4").unwrap();
        let payloads = lib.encode_all(&paths).unwrap();
        assert_eq!(payloads.len(), 2);
        assert!(payloads.iter().all(|p| !p.is_empty()));
    }
}
