//! Code recognition boundary
//!
//! The pipeline treats detectors as opaque: anything that turns a
//! normalized image into zero or more [`Detection`]s. A QR implementation
//! backed by rqrr ships in-tree.

use std::fmt;

use color_eyre::Result;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capture::frame::NormalizedImage;

/// Code symbology tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeKind {
    Qr,
    Ean13,
    Ean8,
    UpcA,
    Code128,
    Code39,
    DataMatrix,
    Unknown,
}

impl CodeKind {
    /// Label used in result batches and the persisted store
    pub fn label(self) -> &'static str {
        match self {
            CodeKind::Qr => "QR",
            CodeKind::Ean13 => "EAN13",
            CodeKind::Ean8 => "EAN8",
            CodeKind::UpcA => "UPCA",
            CodeKind::Code128 => "CODE128",
            CodeKind::Code39 => "CODE39",
            CodeKind::DataMatrix => "DATAMATRIX",
            CodeKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded code with its image-space outline
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: CodeKind,
    pub text: String,
    /// Polygon in image coordinates, at least three points
    pub boundary: Vec<(i32, i32)>,
}

impl Detection {
    /// `KIND:text` form used for result batches
    pub fn tagged_text(&self) -> String {
        format!("{}:{}", self.kind, self.text)
    }
}

/// Recognition engine boundary
///
/// Implementations run on the recognition worker thread; errors are caught
/// per frame there, so a failing detector never kills the worker.
pub trait CodeDetector: Send {
    fn detect(&mut self, image: &NormalizedImage) -> Result<Vec<Detection>>;
}

/// QR detector backed by rqrr
#[derive(Default)]
pub struct QrDetector;

impl CodeDetector for QrDetector {
    fn detect(&mut self, image: &NormalizedImage) -> Result<Vec<Detection>> {
        let mut prepared = rqrr::PreparedImage::prepare(to_gray(image));
        let grids = prepared.detect_grids();
        let mut detections = Vec::with_capacity(grids.len());

        for grid in grids {
            let boundary: Vec<(i32, i32)> = grid.bounds.iter().map(|p| (p.x, p.y)).collect();
            match grid.decode() {
                Ok((_meta, content)) => {
                    trace!(content = %content, "decoded QR code");
                    detections.push(Detection {
                        kind: CodeKind::Qr,
                        text: content,
                        boundary,
                    });
                }
                Err(e) => {
                    // Located but undecodable, e.g. partially occluded
                    debug!(error = %e, "failed to decode located QR grid");
                }
            }
        }
        Ok(detections)
    }
}

/// Integer BT.601 luma conversion for the detector input
fn to_gray(image: &NormalizedImage) -> GrayImage {
    let mut out = Vec::with_capacity(image.width as usize * image.height as usize);
    for px in image.data.chunks_exact(NormalizedImage::CHANNELS) {
        let y = (px[0] as u32 * 77 + px[1] as u32 * 150 + px[2] as u32 * 29) >> 8;
        out.push(y as u8);
    }
    GrayImage::from_raw(image.width, image.height, out).expect("luma buffer matches dimensions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> NormalizedImage {
        let data: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height) as usize * 3)
            .collect();
        NormalizedImage {
            data: Bytes::from(data),
            width,
            height,
        }
    }

    #[test]
    fn to_gray_matches_luma_weights() {
        let img = solid_image(2, 2, [255, 0, 0]);
        let gray = to_gray(&img);
        assert_eq!(gray.dimensions(), (2, 2));
        // 255 * 77 >> 8 = 76
        assert!(gray.pixels().all(|p| p.0[0] == 76));
    }

    #[test]
    fn blank_image_yields_no_detections() {
        let img = solid_image(64, 64, [255, 255, 255]);
        let detections = QrDetector.detect(&img).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn tagged_text_uses_kind_label() {
        let det = Detection {
            kind: CodeKind::Qr,
            text: "ABC123".into(),
            boundary: vec![(0, 0), (1, 0), (1, 1)],
        };
        assert_eq!(det.tagged_text(), "QR:ABC123");
    }
}
