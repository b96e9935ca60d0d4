//! Raw capture → I420 → ARGB conversion

use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::frame::{Geometry, PixelFormat};
use crate::error::{CaptureError, Result};

/// Both converted images of one capture cycle
#[derive(Debug, Clone, Copy)]
pub struct ConvertedFrame<'a> {
    pub i420: &'a [u8],
    pub argb: &'a [u8],
}

/// Converts frames of the negotiated format.
///
/// All scratch and output memory is allocated once here, the per-frame path
/// only writes into it.
pub struct FrameConverter {
    format: PixelFormat,
    geometry: Geometry,
    /// Interleaved full resolution YCbCr from the JPEG decoder, MJPEG only
    ycbcr: Vec<u8>,
    i420: Vec<u8>,
    argb: Vec<u8>,
}

impl FrameConverter {
    pub fn new(format: PixelFormat, geometry: Geometry) -> Self {
        let ycbcr = match format {
            PixelFormat::Mjpeg => vec![0; geometry.pixels() * 3],
            PixelFormat::Yuyv422 => Vec::new(),
        };
        Self {
            format,
            geometry,
            ycbcr,
            i420: vec![0; geometry.i420_len()],
            argb: vec![0; geometry.argb_len()],
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Convert one non-empty raw frame.
    pub fn convert(&mut self, raw: &[u8]) -> Result<ConvertedFrame<'_>> {
        match self.format {
            PixelFormat::Mjpeg => {
                decode_mjpeg(raw, self.geometry, &mut self.ycbcr)?;
                ycbcr444_to_i420(&self.ycbcr, self.geometry, &mut self.i420);
            }
            PixelFormat::Yuyv422 => yuyv_to_i420(raw, self.geometry, &mut self.i420)?,
        }
        i420_to_argb(&self.i420, self.geometry, &mut self.argb);

        Ok(ConvertedFrame {
            i420: &self.i420,
            argb: &self.argb,
        })
    }
}

fn decode_mjpeg(data: &[u8], geometry: Geometry, out: &mut [u8]) -> Result<()> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::YCbCr);
    let mut decoder = JpegDecoder::new_with_options(data, options);
    decoder
        .decode_headers()
        .map_err(|e| CaptureError::Conversion(format!("MJPEG header: {:?}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| CaptureError::Conversion("MJPEG frame without dimensions".into()))?;
    if width != geometry.width as usize || height != geometry.height as usize {
        return Err(CaptureError::Conversion(format!(
            "MJPEG frame is {}x{}, expected {}x{}",
            width, height, geometry.width, geometry.height
        )));
    }

    decoder
        .decode_into(out)
        .map_err(|e| CaptureError::Conversion(format!("MJPEG decode: {:?}", e)))
}

/// Split the I420 buffer into its Y, U and V planes.
fn planes_mut(i420: &mut [u8], geometry: Geometry) -> (&mut [u8], &mut [u8], &mut [u8]) {
    let luma = geometry.pixels();
    let (y, chroma) = i420.split_at_mut(luma);
    let (u, v) = chroma.split_at_mut(luma / 4);
    (y, u, v)
}

fn avg4(a: u8, b: u8, c: u8, d: u8) -> u8 {
    ((a as u16 + b as u16 + c as u16 + d as u16 + 2) >> 2) as u8
}

fn avg2(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) >> 1) as u8
}

/// Interleaved 4:4:4 YCbCr → I420, chroma box-filtered over 2x2 blocks
pub fn ycbcr444_to_i420(src: &[u8], geometry: Geometry, i420: &mut [u8]) {
    let width = geometry.width as usize;
    let height = geometry.height as usize;
    let (y_plane, u_plane, v_plane) = planes_mut(i420, geometry);

    for (dst, px) in y_plane.iter_mut().zip(src.chunks_exact(3)) {
        *dst = px[0];
    }

    let chroma_width = width / 2;
    for cy in 0..height / 2 {
        let top = &src[(2 * cy) * width * 3..(2 * cy + 1) * width * 3];
        let bottom = &src[(2 * cy + 1) * width * 3..(2 * cy + 2) * width * 3];
        for cx in 0..chroma_width {
            let l = 6 * cx;
            let r = l + 3;
            let dst = cy * chroma_width + cx;
            u_plane[dst] = avg4(top[l + 1], top[r + 1], bottom[l + 1], bottom[r + 1]);
            v_plane[dst] = avg4(top[l + 2], top[r + 2], bottom[l + 2], bottom[r + 2]);
        }
    }
}

/// Packed YUYV 4:2:2 → I420, chroma averaged over each pair of rows
pub fn yuyv_to_i420(src: &[u8], geometry: Geometry, i420: &mut [u8]) -> Result<()> {
    if src.len() < geometry.yuyv_len() {
        return Err(CaptureError::Conversion(format!(
            "YUYV frame has {} bytes, expected {}",
            src.len(),
            geometry.yuyv_len()
        )));
    }

    let width = geometry.width as usize;
    let height = geometry.height as usize;
    let stride = width * 2;
    let (y_plane, u_plane, v_plane) = planes_mut(i420, geometry);

    for (dst, pair) in y_plane.iter_mut().zip(src.chunks_exact(2)) {
        *dst = pair[0];
    }

    let chroma_width = width / 2;
    for cy in 0..height / 2 {
        let top = &src[(2 * cy) * stride..(2 * cy + 1) * stride];
        let bottom = &src[(2 * cy + 1) * stride..(2 * cy + 2) * stride];
        for (cx, (t, b)) in top.chunks_exact(4).zip(bottom.chunks_exact(4)).enumerate() {
            let dst = cy * chroma_width + cx;
            u_plane[dst] = avg2(t[1], b[1]);
            v_plane[dst] = avg2(t[3], b[3]);
        }
    }
    Ok(())
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// I420 → 32-bit ARGB (BT.601, studio swing).
///
/// Little-endian ARGB words, so the bytes land as B, G, R, A in memory.
pub fn i420_to_argb(i420: &[u8], geometry: Geometry, argb: &mut [u8]) {
    let width = geometry.width as usize;
    let luma = geometry.pixels();
    let y_plane = &i420[..luma];
    let u_plane = &i420[luma..luma + luma / 4];
    let v_plane = &i420[luma + luma / 4..];
    let chroma_width = width / 2;

    for (i, px) in argb.chunks_exact_mut(4).enumerate() {
        let (row, col) = (i / width, i % width);
        let chroma = (row / 2) * chroma_width + col / 2;

        let c = 298 * (y_plane[i] as i32 - 16);
        let d = u_plane[chroma] as i32 - 128;
        let e = v_plane[chroma] as i32 - 128;

        px[0] = clamp((c + 516 * d + 128) >> 8);
        px[1] = clamp((c - 100 * d - 208 * e + 128) >> 8);
        px[2] = clamp((c + 409 * e + 128) >> 8);
        px[3] = 0xff;
    }
}
