// src/media/mod.rs
//! Media codec
//!
//! Turns user-supplied images and audio into inline `data:` URL payloads.
//! Images wider than the configured cap are scaled down, keeping the aspect
//! ratio, and re-encoded in their source format. Audio is embedded untouched.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use log::{debug, info, warn};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::models::{MediaKind, MediaPayload};

pub mod capture;

pub use capture::{format_duration, AudioCapture};

/// Default maximum width of an inline image, in pixels
pub const MAX_IMAGE_WIDTH: u32 = 800;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to read media: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to process image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Media is empty")]
    Empty,

    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("Capture task failed: {0}")]
    Capture(String),
}

/// Build a `data:<mime>;base64,<payload>` URL
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Decode the payload of a data URL produced by [`to_data_url`]
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, MediaError> {
    let (_, data) = data_url
        .split_once(',')
        .ok_or_else(|| MediaError::Unsupported("not a data URL".to_string()))?;
    BASE64
        .decode(data)
        .map_err(|e| MediaError::Unsupported(format!("invalid base64 payload: {}", e)))
}

/// Scale `image` down to `max_width` if it is wider, preserving aspect ratio
pub fn cap_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= max_width || max_width == 0 {
        return image;
    }

    let new_height = ((height as f64) * (max_width as f64) / (width as f64)).round().max(1.0) as u32;
    debug!("Resizing image from {}x{} to {}x{}", width, height, max_width, new_height);
    image.resize_exact(max_width, new_height, FilterType::Lanczos3)
}

/// Re-encode an image so it is at most `max_width` pixels wide
pub fn encode_image(bytes: &[u8], mime_type: &str, max_width: u32) -> Result<MediaPayload, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }

    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let resized = cap_width(decoded, max_width);

    // JPEG has no alpha channel
    let resized = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };

    let mut encoded = Vec::new();
    resized.write_to(&mut Cursor::new(&mut encoded), format)?;

    // The label always follows the bytes; the caller's type is only a hint
    let sniffed = image_mime_type(format)?;
    if mime_type != sniffed {
        warn!("Image labelled {} is actually {}", mime_type, sniffed);
    }
    let mime_type = sniffed.to_string();

    info!(
        "Encoded {} image {}x{} ({} bytes)",
        mime_type,
        resized.width(),
        resized.height(),
        encoded.len()
    );

    Ok(MediaPayload {
        kind: MediaKind::Image,
        data_url: to_data_url(&mime_type, &encoded),
        mime_type,
    })
}

/// Embed recorded audio as-is
pub fn encode_audio(bytes: &[u8], mime_type: &str) -> Result<MediaPayload, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }
    debug!("Encoded {} audio ({} bytes)", mime_type, bytes.len());
    Ok(MediaPayload {
        kind: MediaKind::Audio,
        data_url: to_data_url(mime_type, bytes),
        mime_type: mime_type.to_string(),
    })
}

/// Read and re-encode an image file. Decoding runs off the async runtime.
pub async fn load_image(path: &Path, max_width: u32) -> Result<MediaPayload, MediaError> {
    let mime_type = mime_type_for_path(path)
        .filter(|m| m.starts_with("image/"))
        .ok_or_else(|| MediaError::Unsupported(path.display().to_string()))?;
    let bytes = tokio::fs::read(path).await?;

    tokio::task::spawn_blocking(move || encode_image(&bytes, mime_type, max_width))
        .await
        .map_err(|e| MediaError::Capture(e.to_string()))?
}

/// Read an audio file into an inline payload
pub async fn load_audio(path: &Path) -> Result<MediaPayload, MediaError> {
    let mime_type = mime_type_for_path(path)
        .filter(|m| m.starts_with("audio/"))
        .ok_or_else(|| MediaError::Unsupported(path.display().to_string()))?;
    let bytes = tokio::fs::read(path).await?;
    encode_audio(&bytes, mime_type)
}

/// Guess a MIME type from a file extension
pub fn mime_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime_type = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "webm" => "audio/webm",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        _ => return None,
    };
    Some(mime_type)
}

fn image_mime_type(format: ImageFormat) -> Result<&'static str, MediaError> {
    match format {
        ImageFormat::Jpeg => Ok("image/jpeg"),
        ImageFormat::Png => Ok("image/png"),
        ImageFormat::Gif => Ok("image/gif"),
        ImageFormat::WebP => Ok("image/webp"),
        ImageFormat::Bmp => Ok("image/bmp"),
        other => Err(MediaError::Unsupported(format!("{:?}", other))),
    }
}
