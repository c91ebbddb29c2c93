use std::io::Cursor;

use image::ImageFormat;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};

use crate::data::SiteData;
use crate::transform::Source;

/// Lossless size optimization for raster images.
///
/// PNGs are re-encoded with the strongest compression and kept only when the
/// result is smaller. Everything else (JPEG, SVG, GIF, fonts) passes through
/// unchanged.
pub(super) fn optimize(source: &Source<'_>, _: &SiteData) -> anyhow::Result<Vec<u8>> {
    let is_png = source
        .path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));

    if !is_png {
        return Ok(source.data.to_vec());
    }

    let image = image::load_from_memory_with_format(source.data, ImageFormat::Png)?;

    let mut buffer = Cursor::new(Vec::new());
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
    image.write_with_encoder(encoder)?;
    let buffer = buffer.into_inner();

    if buffer.len() < source.data.len() {
        Ok(buffer)
    } else {
        Ok(source.data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;
    use image::{ImageEncoder, RgbaImage};

    use super::*;

    fn png(compression: CompressionType) -> Vec<u8> {
        let image = RgbaImage::from_fn(64, 64, |x, _| image::Rgba([(x * 4) as u8, 0, 0, 255]));
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, compression, FilterType::NoFilter)
            .write_image(image.as_raw(), 64, 64, image::ExtendedColorType::Rgba8)
            .unwrap();
        out
    }

    #[test]
    fn png_never_grows_and_stays_decodable() {
        let original = png(CompressionType::Fast);
        let source = Source::new(Utf8Path::new("assets/images/a.png"), &original);

        let out = optimize(&source, &SiteData::default()).unwrap();
        assert!(out.len() <= original.len());

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn fonts_pass_through() {
        let font = b"wOFF\0\x01\0\0";
        let source = Source::new(Utf8Path::new("assets/fonts/a.woff"), font);

        assert_eq!(optimize(&source, &SiteData::default()).unwrap(), font);
    }

    #[test]
    fn corrupt_png_is_an_error() {
        let source = Source::new(Utf8Path::new("broken.png"), b"not a png");
        assert!(optimize(&source, &SiteData::default()).is_err());
    }
}
