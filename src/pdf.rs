use crate::error::BadgePressError;
use crate::raster::RasterPage;
use crate::types::Size;
use lopdf::{dictionary, Document, Object, Stream};

const JPEG_QUALITY: u8 = 90;

/// Packs rasterized pages into a single PDF, one full-bleed image per page.
///
/// Pages are embedded as JPEG XObjects behind a DCTDecode filter; the content
/// stream scales each image to the physical page box, so the PDF prints at
/// true size regardless of the raster DPI.
pub fn assemble(pages: &[RasterPage], page_size: Size) -> Result<Vec<u8>, BadgePressError> {
    if pages.is_empty() {
        return Err(BadgePressError::InvalidConfiguration(
            "cannot assemble a pdf with zero pages".to_string(),
        ));
    }

    let width_pt = page_size.width.to_f32();
    let height_pt = page_size.height.to_f32();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let jpeg = encode_jpeg(page)?;
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width_px() as i64,
                "Height" => page.height_px() as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let image_name = format!("Im{index}");
        let content = format!("q\n{width_pt} 0 0 {height_pt} 0 0 cm\n/{image_name} Do\nQ\n");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let resources = dictionary! {
            "XObject" => dictionary! {
                image_name => image_id,
            },
        };
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn encode_jpeg(page: &RasterPage) -> Result<Vec<u8>, BadgePressError> {
    use image::ImageEncoder;

    let rgb = page.to_rgb();
    let mut jpeg = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder
        .write_image(
            &rgb,
            page.width_px(),
            page.height_px(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| BadgePressError::Raster(format!("jpeg encode failed: {e}")))?;
    Ok(jpeg)
}
