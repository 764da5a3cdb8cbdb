//! Draw recognized faces onto a copy of the photo.
//!
//! Each face gets a box outline and a filled label band under it with the
//! identity written in white. The same labels and boxes also go into a JSON
//! sidecar (`<stem>.labels.json`) next to the annotated image, one entry per
//! face in drawing order.

use crate::output::OutputError;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use likeness_core::{BoundingBox, RecognizedFace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const BOX_THICKNESS: u32 = 2;
pub const LABEL_BAND_HEIGHT: u32 = 14;
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_TEXT_SCALE: f32 = 12.0;

/// DejaVu Sans, see `assets/DejaVuSans-LICENSE`.
static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

pub fn label_font() -> Result<FontRef<'static>, OutputError> {
    Ok(FontRef::try_from_slice(LABEL_FONT)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledBox {
    pub label: String,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSidecar {
    pub photo: PathBuf,
    pub faces: Vec<LabeledBox>,
}

/// Paths written by [`annotate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Annotated {
    pub image: PathBuf,
    pub labels: PathBuf,
}

/// Annotate `photo` and write the result into `output_dir` under the same
/// file name.
pub fn annotate(photo: &Path, faces: &[RecognizedFace], output_dir: &Path) -> Result<Annotated, OutputError> {
    let mut image = image::open(photo)
        .map_err(|source| OutputError::Image {
            path: photo.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let font = label_font()?;
    for face in faces {
        draw_face(&mut image, &face.bounding_box, face.result.label(), &font);
    }

    std::fs::create_dir_all(output_dir).map_err(OutputError::io(output_dir))?;
    let name = photo
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("annotated.png"));
    let image_path = output_dir.join(&name);
    image.save(&image_path).map_err(|source| OutputError::Image {
        path: image_path.clone(),
        source,
    })?;

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let labels_path = output_dir.join(format!("{stem}.labels.json"));
    let sidecar = LabelSidecar {
        photo: photo.to_path_buf(),
        faces: faces
            .iter()
            .map(|f| LabeledBox {
                label: f.result.label().to_string(),
                top: f.bounding_box.top,
                right: f.bounding_box.right,
                bottom: f.bounding_box.bottom,
                left: f.bounding_box.left,
            })
            .collect(),
    };
    let json = serde_json::to_vec_pretty(&sidecar)?;
    std::fs::write(&labels_path, json).map_err(OutputError::io(&labels_path))?;

    tracing::debug!(photo = %photo.display(), faces = faces.len(), out = %image_path.display(), "annotated photo");
    Ok(Annotated {
        image: image_path,
        labels: labels_path,
    })
}

/// Box outline plus labeled band, all clipped to the image.
pub fn draw_face(image: &mut RgbImage, bb: &BoundingBox, label: &str, font: &FontRef<'_>) {
    let t = BOX_THICKNESS as i32;
    // Outline as four filled strips.
    fill_rect(image, bb.left, bb.top, bb.right, bb.top + t);
    fill_rect(image, bb.left, bb.bottom - t, bb.right, bb.bottom);
    fill_rect(image, bb.left, bb.top, bb.left + t, bb.bottom);
    fill_rect(image, bb.right - t, bb.top, bb.right, bb.bottom);
    fill_rect(image, bb.left, bb.bottom, bb.right, bb.bottom + LABEL_BAND_HEIGHT as i32);
    draw_text_mut(
        image,
        LABEL_COLOR,
        bb.left + t + 1,
        bb.bottom + 1,
        PxScale::from(LABEL_TEXT_SCALE),
        font,
        label,
    );
}

/// Fill the half-open rectangle `[x0, x1) x [y0, y1)`.
fn fill_rect(image: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
    let (y0, y1) = (y0.clamp(0, h), y1.clamp(0, h));
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x as u32, y as u32, BOX_COLOR);
        }
    }
}
