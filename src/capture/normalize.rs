//! Image normalization: raw device frames to canonical interleaved RGB
//!
//! Trivial element-wise mappings (mono broadcast, RGB pass-through, BGR
//! reorder) are handled inline. Bayer-pattern encodings delegate to the
//! external pixel-conversion routine behind [`PixelConvert`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::backend::StatusCode;
use crate::capture::frame::{NormalizedImage, PixelFormat, RawFrame};

/// Demosaic algorithm selector forwarded to the external converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemosaicMethod {
    Nearest,
    Bilinear,
    EdgeSensing,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(
        "frame buffer holds {actual} bytes, expected {expected} for {width}x{height} {format:?}"
    )]
    BadBuffer {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("pixel conversion failed with status {0}")]
    ConversionFailed(StatusCode),
}

/// External pixel-conversion routine boundary
///
/// Matches the vendor conversion call: demosaic `src` into `dst`
/// (interleaved `dst_format`, `width * height * 3` bytes for RGB) and
/// return a status code, zero on success. `padding_x`/`padding_y` are the
/// per-axis line padding of the source buffer.
pub trait PixelConvert: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn convert(
        &self,
        width: u32,
        height: u32,
        src_format: PixelFormat,
        src: &[u8],
        padding_x: u32,
        padding_y: u32,
        demosaic: DemosaicMethod,
        dst_format: PixelFormat,
        dst: &mut [u8],
    ) -> StatusCode;
}

/// Convert a raw frame into an independently owned RGB image
///
/// Never retains a reference to the source buffer past return; the caller
/// releases the frame whether or not conversion succeeded.
pub fn normalize(
    frame: &RawFrame,
    converter: &dyn PixelConvert,
    demosaic: DemosaicMethod,
) -> Result<NormalizedImage, NormalizeError> {
    let pixels = frame.width as usize * frame.height as usize;
    let expected = pixels * frame.format.bytes_per_pixel();
    if pixels == 0 || frame.data.len() < expected {
        return Err(NormalizeError::BadBuffer {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            expected,
            actual: frame.data.len(),
        });
    }

    let data = match frame.format {
        PixelFormat::Rgb8 => Bytes::copy_from_slice(&frame.data[..expected]),
        PixelFormat::Bgr8 => {
            let mut out = vec![0u8; expected];
            for (dst, src) in out.chunks_exact_mut(3).zip(frame.data.chunks_exact(3)) {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            }
            Bytes::from(out)
        }
        PixelFormat::Mono8 => {
            let mut out = Vec::with_capacity(pixels * NormalizedImage::CHANNELS);
            for &v in &frame.data[..pixels] {
                out.extend_from_slice(&[v, v, v]);
            }
            Bytes::from(out)
        }
        PixelFormat::BayerRg8
        | PixelFormat::BayerGb8
        | PixelFormat::BayerGr8
        | PixelFormat::BayerBg8 => {
            let mut out = vec![0u8; pixels * NormalizedImage::CHANNELS];
            let status = converter.convert(
                frame.width,
                frame.height,
                frame.format,
                &frame.data,
                0,
                0,
                demosaic,
                PixelFormat::Rgb8,
                &mut out,
            );
            if status != 0 {
                return Err(NormalizeError::ConversionFailed(status));
            }
            Bytes::from(out)
        }
    };

    Ok(NormalizedImage {
        data,
        width: frame.width,
        height: frame.height,
    })
}

/// Nearest-site software demosaic
///
/// Fallback [`PixelConvert`] used when no vendor conversion routine is
/// wired in. Each pixel takes the red and blue samples of its 2x2 Bayer
/// tile and the average of the two green sites; the demosaic selector is
/// ignored.
pub struct NearestDemosaic;

impl PixelConvert for NearestDemosaic {
    fn convert(
        &self,
        width: u32,
        height: u32,
        src_format: PixelFormat,
        src: &[u8],
        padding_x: u32,
        _padding_y: u32,
        _demosaic: DemosaicMethod,
        dst_format: PixelFormat,
        dst: &mut [u8],
    ) -> StatusCode {
        if dst_format != PixelFormat::Rgb8 {
            return -1;
        }
        // Red/blue offsets inside the 2x2 tile, per pattern
        let (rx, ry, bx, by) = match src_format {
            PixelFormat::BayerRg8 => (0, 0, 1, 1),
            PixelFormat::BayerGr8 => (1, 0, 0, 1),
            PixelFormat::BayerGb8 => (0, 1, 1, 0),
            PixelFormat::BayerBg8 => (1, 1, 0, 0),
            _ => return -2,
        };

        let w = width as usize;
        let h = height as usize;
        let stride = w + padding_x as usize;
        if w == 0 || h == 0 || src.len() < stride * h || dst.len() < w * h * 3 {
            return -3;
        }

        let at = |x: usize, y: usize| src[y * stride + x];
        for y in 0..h {
            let ty = y & !1;
            for x in 0..w {
                let tx = x & !1;
                let r = at((tx + rx).min(w - 1), (ty + ry).min(h - 1));
                let b = at((tx + bx).min(w - 1), (ty + by).min(h - 1));
                // Green sites are the two tile cells that are neither red nor blue
                let g1 = at((tx + bx).min(w - 1), (ty + ry).min(h - 1)) as u16;
                let g2 = at((tx + rx).min(w - 1), (ty + by).min(h - 1)) as u16;
                let o = (y * w + x) * 3;
                dst[o] = r;
                dst[o + 1] = ((g1 + g2) / 2) as u8;
                dst[o + 2] = b;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingConvert(StatusCode);

    impl PixelConvert for FailingConvert {
        fn convert(
            &self,
            _width: u32,
            _height: u32,
            _src_format: PixelFormat,
            _src: &[u8],
            _padding_x: u32,
            _padding_y: u32,
            _demosaic: DemosaicMethod,
            _dst_format: PixelFormat,
            _dst: &mut [u8],
        ) -> StatusCode {
            self.0
        }
    }

    fn frame(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        RawFrame {
            id: 1,
            width,
            height,
            format,
            data,
        }
    }

    #[test]
    fn mono_broadcasts_to_three_channels() {
        let f = frame(PixelFormat::Mono8, 2, 1, vec![10, 200]);
        let img = normalize(&f, &NearestDemosaic, DemosaicMethod::Bilinear).unwrap();
        assert_eq!(&img.data[..], &[10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn bgr_reorders_channels() {
        let f = frame(PixelFormat::Bgr8, 1, 1, vec![1, 2, 3]);
        let img = normalize(&f, &NearestDemosaic, DemosaicMethod::Bilinear).unwrap();
        assert_eq!(&img.data[..], &[3, 2, 1]);
    }

    #[test]
    fn rgb_passes_through() {
        let f = frame(PixelFormat::Rgb8, 1, 2, vec![9, 8, 7, 6, 5, 4]);
        let img = normalize(&f, &NearestDemosaic, DemosaicMethod::Bilinear).unwrap();
        assert_eq!(&img.data[..], &[9, 8, 7, 6, 5, 4]);
        assert_eq!(img.width, 1);
        assert_eq!(img.height, 2);
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let f = frame(PixelFormat::Mono8, 4, 4, Vec::new());
        let err = normalize(&f, &NearestDemosaic, DemosaicMethod::Bilinear).unwrap_err();
        assert!(matches!(err, NormalizeError::BadBuffer { .. }));
    }

    #[test]
    fn converter_status_surfaces_as_conversion_failed() {
        let f = frame(PixelFormat::BayerRg8, 2, 2, vec![0; 4]);
        let err = normalize(&f, &FailingConvert(-5), DemosaicMethod::Bilinear).unwrap_err();
        assert!(matches!(err, NormalizeError::ConversionFailed(-5)));
    }

    #[test]
    fn nearest_demosaic_rggb_tile() {
        // 2x2 RGGB tile: R=100, G=40/60, B=20
        let f = frame(PixelFormat::BayerRg8, 2, 2, vec![100, 40, 60, 20]);
        let img = normalize(&f, &NearestDemosaic, DemosaicMethod::Nearest).unwrap();
        // Every pixel of the tile resolves to the same RGB triple
        for px in img.data.chunks_exact(3) {
            assert_eq!(px, &[100, 50, 20]);
        }
    }
}
