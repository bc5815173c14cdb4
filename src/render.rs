//! Page/artifact rendering: the capability interface that materializes a
//! [`crate::models::VisualCitation`]'s bytes from the original document, and
//! enumerates the embedded images a document's pages actually contain.
//!
//! [`PdfImageRenderer`] is the sole implementation, built directly on
//! `lopdf`'s object table rather than a full PDF rasterizer: it walks a
//! page's `/Resources/XObject` dictionary for image streams, decodes them
//! with `image` (converting CMYK/grayscale samples to RGB along the way),
//! and re-encodes as PNG. Artifacts this can't locate or decode (missing
//! xref, unsupported color space, a citation with no xref at all) are
//! `NotFound`, never synthesized.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId};

use crate::error::{CoreError, CoreResult};
use crate::models::{CitationType, VisualCitation};

/// Materializes visual artifacts from a document's raw bytes.
pub trait PageRenderer: Send + Sync {
    /// Walks `document_bytes`' pages and returns a [`VisualCitation`] per
    /// embedded raster image found, with `xref` set to the image's PDF
    /// object reference. Formats with no embedded-image concept (plain
    /// text, already-rasterized image uploads) return an empty list.
    fn enumerate_images(&self, document_id: &str, document_bytes: &[u8]) -> CoreResult<Vec<VisualCitation>>;

    /// Re-extracts and decodes the image at `xref` within `document_bytes`,
    /// returning PNG-encoded bytes. `NotFound` when `xref` is absent, not
    /// present in the document, or not a decodable image stream.
    fn render(&self, document_bytes: &[u8], xref: Option<&str>) -> CoreResult<Vec<u8>>;
}

/// Enumerates and decodes embedded raster images directly from a PDF's
/// object table via `lopdf`.
pub struct PdfImageRenderer;

impl PageRenderer for PdfImageRenderer {
    fn enumerate_images(&self, document_id: &str, document_bytes: &[u8]) -> CoreResult<Vec<VisualCitation>> {
        let doc = match PdfDocument::load_mem(document_bytes) {
            Ok(doc) => doc,
            Err(_) => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for (page_num, page_id) in doc.get_pages() {
            let Some(xobjects) = page_xobjects(&doc, page_id) else {
                continue;
            };

            let mut index = 0u32;
            for (_name, value) in xobjects.iter() {
                let Ok(object_id) = value.as_reference() else {
                    continue;
                };
                let Ok(Object::Stream(stream)) = doc.get_object(object_id) else {
                    continue;
                };
                let is_image = stream
                    .dict
                    .get(b"Subtype")
                    .ok()
                    .and_then(|o| o.as_name().ok())
                    == Some(b"Image".as_slice());
                if !is_image {
                    continue;
                }

                index += 1;
                let reference_text = format!("image {page_num}-{index}");
                let xref = format!("{} {}", object_id.0, object_id.1);
                out.push(VisualCitation {
                    citation_id: crate::citation::citation_id(document_id, page_num, &reference_text),
                    citation_type: CitationType::Image,
                    document_id: document_id.to_string(),
                    page_number: page_num,
                    reference_text,
                    bbox: None,
                    xref: Some(xref),
                    cached_bytes: None,
                });
            }
        }
        Ok(out)
    }

    fn render(&self, document_bytes: &[u8], xref: Option<&str>) -> CoreResult<Vec<u8>> {
        let xref = xref.ok_or_else(|| CoreError::not_found("citation has no stored xref"))?;
        let object_id = parse_object_ref(xref).ok_or_else(|| CoreError::not_found(format!("malformed xref {xref}")))?;

        let doc = PdfDocument::load_mem(document_bytes).map_err(|e| CoreError::ContentMalformed(e.to_string()))?;
        let object = doc
            .get_object(object_id)
            .map_err(|_| CoreError::not_found(format!("xref {xref} not present in document")))?;
        let stream = match object {
            Object::Stream(stream) => stream,
            _ => return Err(CoreError::not_found(format!("xref {xref} is not an image stream"))),
        };

        let image = decode_image_stream(stream)?;
        encode_png(image)
    }
}

/// Resources on a page can be inherited from an ancestor `/Pages` node;
/// this only follows the direct `/Resources` entry, which covers the
/// overwhelming majority of real-world single-level manuals.
fn page_xobjects<'a>(doc: &'a PdfDocument, page_id: ObjectId) -> Option<&'a Dictionary> {
    let page_dict = doc.get_dictionary(page_id).ok()?;
    let resources = resolve(doc, page_dict.get(b"Resources").ok()?)?;
    let resources = resources.as_dict().ok()?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?;
    xobjects.as_dict().ok()
}

fn resolve<'a>(doc: &'a PdfDocument, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn parse_object_ref(xref: &str) -> Option<ObjectId> {
    let mut parts = xref.split_whitespace();
    let num: u32 = parts.next()?.parse().ok()?;
    let gen: u16 = parts.next()?.parse().ok()?;
    Some((num, gen))
}

/// Decodes an image XObject stream to RGB8, handling the two cases that
/// cover essentially every scanned equipment manual: DCT (JPEG) streams
/// decoded wholesale by `image`, and raw Flate-decompressed samples in
/// DeviceGray/DeviceRGB/DeviceCMYK at 8 bits per component. Other color
/// spaces (indexed palettes, 1/2/4-bit samples) are reported as
/// content-malformed rather than guessed at.
fn decode_image_stream(stream: &lopdf::Stream) -> CoreResult<RgbImage> {
    let filter_is_dct = stream
        .dict
        .get(b"Filter")
        .ok()
        .and_then(filter_name)
        .as_deref()
        == Some("DCTDecode");

    if filter_is_dct {
        return image::load_from_memory(&stream.content)
            .map(|img| img.to_rgb8())
            .map_err(|e| CoreError::ContentMalformed(e.to_string()));
    }

    let width = stream_int(stream, b"Width").ok_or_else(|| CoreError::ContentMalformed("image stream missing /Width".to_string()))?;
    let height = stream_int(stream, b"Height").ok_or_else(|| CoreError::ContentMalformed("image stream missing /Height".to_string()))?;
    let bits = stream_int(stream, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(CoreError::ContentMalformed(format!("unsupported bit depth {bits}")));
    }

    let data = stream.decompressed_content().map_err(|e| CoreError::ContentMalformed(e.to_string()))?;
    let components = data.len() / (width as usize * height as usize).max(1);

    match components {
        1 => {
            let gray = GrayImage::from_raw(width as u32, height as u32, data)
                .ok_or_else(|| CoreError::ContentMalformed("gray sample buffer size mismatch".to_string()))?;
            Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
        }
        3 => RgbImage::from_raw(width as u32, height as u32, data)
            .ok_or_else(|| CoreError::ContentMalformed("rgb sample buffer size mismatch".to_string())),
        4 => Ok(cmyk_to_rgb(&data, width as u32, height as u32)?),
        other => Err(CoreError::ContentMalformed(format!("unsupported sample layout ({other} components)"))),
    }
}

fn cmyk_to_rgb(data: &[u8], width: u32, height: u32) -> CoreResult<RgbImage> {
    let expected = width as usize * height as usize * 4;
    if data.len() < expected {
        return Err(CoreError::ContentMalformed("cmyk sample buffer too short".to_string()));
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in data.chunks_exact(4) {
        let (c, m, y, k) = (px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0, px[3] as f32 / 255.0);
        rgb.push((255.0 * (1.0 - c) * (1.0 - k)) as u8);
        rgb.push((255.0 * (1.0 - m) * (1.0 - k)) as u8);
        rgb.push((255.0 * (1.0 - y) * (1.0 - k)) as u8);
    }
    RgbImage::from_raw(width, height, rgb).ok_or_else(|| CoreError::ContentMalformed("cmyk conversion size mismatch".to_string()))
}

fn filter_name(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        Object::Array(items) => items.first().and_then(filter_name),
        _ => None,
    }
}

fn stream_int(stream: &lopdf::Stream, key: &[u8]) -> Option<i64> {
    stream.dict.get(key).ok().and_then(|o| o.as_i64().ok())
}

fn encode_png(image: RgbImage) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CoreError::internal(format!("png encoding failed: {e}")))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_object_ref_reads_num_and_gen() {
        assert_eq!(parse_object_ref("12 0"), Some((12, 0)));
        assert_eq!(parse_object_ref("not-a-ref"), None);
    }

    #[test]
    fn enumerate_images_on_non_pdf_bytes_is_empty_not_error() {
        let renderer = PdfImageRenderer;
        let result = renderer.enumerate_images("doc-1", b"not a pdf").unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn render_without_xref_is_not_found() {
        let renderer = PdfImageRenderer;
        let err = renderer.render(b"whatever", None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn render_with_unresolvable_xref_is_not_found() {
        let renderer = PdfImageRenderer;
        // A syntactically-valid but empty PDF has no object 99 0.
        let minimal_pdf = PdfDocument::with_version("1.5");
        let mut bytes = Vec::new();
        minimal_pdf.save_to(&mut bytes).unwrap();
        let err = renderer.render(&bytes, Some("99 0")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn cmyk_to_rgb_converts_full_black_to_zero() {
        // C=0 M=0 Y=0 K=255 is pure black in every channel.
        let data = vec![0u8, 0, 0, 255];
        let img = cmyk_to_rgb(&data, 1, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn cmyk_to_rgb_converts_no_ink_to_white() {
        let data = vec![0u8, 0, 0, 0];
        let img = cmyk_to_rgb(&data, 1, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
    }
}
