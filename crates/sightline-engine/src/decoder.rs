use std::borrow::Cow;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

/// A validated raster for one request. Owned by the dispatch call that
/// decoded it and dropped when the response is built; never cached or
/// shared across requests.
#[derive(Debug)]
pub struct DecodedFrame {
    image: DynamicImage,
    width: u32,
    height: u32,
}

impl DecodedFrame {
    pub fn new(image: DynamicImage) -> Self {
        let width = image.width();
        let height = image.height();
        Self {
            image,
            width,
            height,
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image bytes: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded raster has zero dimensions")]
    EmptyRaster,
}

/// Decodes one inbound image payload. A `data:image/...;base64,` header is
/// optional; when present everything up to the first comma is dropped.
/// Embedded ASCII whitespace (line-wrapped base64) is tolerated.
pub fn decode_frame(payload: &str) -> Result<DecodedFrame, DecodeError> {
    let trimmed = payload.trim();
    let encoded = match trimmed.split_once(',') {
        Some((_, tail)) => tail,
        None => trimmed,
    };
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let encoded: Cow<'_, str> = if encoded.bytes().any(|b| b.is_ascii_whitespace()) {
        Cow::Owned(encoded.split_ascii_whitespace().collect())
    } else {
        Cow::Borrowed(encoded)
    };
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = BASE64.decode(encoded.as_bytes())?;
    let image = image::load_from_memory(&bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::EmptyRaster);
    }
    Ok(DecodedFrame::new(image))
}

/// Re-encodes a frame as base64 JPEG for transport to an inference
/// endpoint, downscaling so the longest edge is at most `max_edge`.
pub fn to_jpeg_base64(frame: &DecodedFrame, max_edge: u32) -> anyhow::Result<String> {
    let image = if frame.width().max(frame.height()) > max_edge {
        frame.image().resize(max_edge, max_edge, FilterType::Triangle)
    } else {
        frame.image().clone()
    };

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), 85);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|err| anyhow::anyhow!("JPEG re-encode failed: {err}"))?;
    Ok(BASE64.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::{decode_frame, to_jpeg_base64, DecodeError, BASE64};
    use base64::Engine as _;

    fn png_base64(width: u32, height: u32) -> String {
        let img = RgbaImage::from_fn(width, height, |_, _| Rgba([40, 120, 80, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .expect("encode test png");
        BASE64.encode(&bytes)
    }

    #[test]
    fn decode_accepts_payload_with_and_without_data_uri_header() {
        let encoded = png_base64(12, 8);
        let bare = decode_frame(&encoded).expect("bare payload");
        let prefixed =
            decode_frame(&format!("data:image/png;base64,{encoded}")).expect("prefixed payload");
        assert_eq!((bare.width(), bare.height()), (12, 8));
        assert_eq!((prefixed.width(), prefixed.height()), (12, 8));
    }

    #[test]
    fn decode_is_idempotent_on_dimensions() {
        let encoded = png_base64(17, 5);
        let first = decode_frame(&encoded).expect("first decode");
        let second = decode_frame(&encoded).expect("second decode");
        assert_eq!(
            (first.width(), first.height()),
            (second.width(), second.height())
        );
    }

    #[test]
    fn decode_tolerates_line_wrapped_base64() {
        let encoded = png_base64(20, 10);
        let mut wrapped = String::new();
        for (offset, chunk) in encoded.as_bytes().chunks(24).enumerate() {
            if offset > 0 {
                wrapped.push_str("\r\n");
            }
            wrapped.push_str(std::str::from_utf8(chunk).expect("ascii"));
        }
        let frame = decode_frame(&wrapped).expect("wrapped payload");
        assert_eq!((frame.width(), frame.height()), (20, 10));
    }

    #[test]
    fn decode_rejects_empty_payloads() {
        assert!(matches!(decode_frame(""), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_frame("data:image/png;base64,"),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn decode_rejects_bad_base64_and_non_image_bytes() {
        assert!(matches!(
            decode_frame("!!not-base64!!"),
            Err(DecodeError::Base64(_))
        ));
        let not_an_image = BASE64.encode(b"plain text, not pixels");
        assert!(matches!(
            decode_frame(&not_an_image),
            Err(DecodeError::Image(_))
        ));
    }

    #[test]
    fn jpeg_reencode_downscales_large_frames() {
        let encoded = png_base64(64, 32);
        let frame = decode_frame(&encoded).expect("decode");
        let jpeg = to_jpeg_base64(&frame, 16).expect("re-encode");
        let bytes = BASE64.decode(jpeg.as_bytes()).expect("valid base64");
        let reloaded = image::load_from_memory(&bytes).expect("valid jpeg");
        assert!(reloaded.width() <= 16 && reloaded.height() <= 16);
    }
}
