// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel formats, software format conversion, and on-disk codecs.
//!
//! Drivers keep raw and converted frames in [`Image`] slots and hand out
//! borrowed [`ImageView`]s. Conversion always produces a new, tightly packed
//! [`Image`]; the source slot is never modified.

use core::fmt;
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// JPEG quality used by the default encoder.
pub const JPEG_QUALITY: i32 = 95;

/// Pixel layouts understood by the conversion and codec routines.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit grayscale
    Mono8,
    /// 16-bit little-endian grayscale
    Mono16,
    /// YUV 4:2:2 packed as Y0 U Y1 V
    Yuv422,
    /// 24-bit RGB
    Rgb8,
    /// 24-bit BGR
    Bgr8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 | PixelFormat::Yuv422 => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }

    /// Bytes in one tightly packed row of `cols` pixels.
    pub const fn row_stride(self, cols: u32) -> usize {
        self.bytes_per_pixel() * cols as usize
    }

    /// ROS `sensor_msgs/Image` encoding name.
    pub const fn encoding(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "mono8",
            PixelFormat::Mono16 => "mono16",
            PixelFormat::Yuv422 => "yuv422_yuy2",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.encoding())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("conversion from {from} to {to} is not supported")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    #[error("image data holds {actual} bytes but {expected} are required")]
    Size { expected: usize, actual: usize },

    #[error("stride {stride} is smaller than a {cols} pixel {format} row")]
    Stride {
        stride: u32,
        cols: u32,
        format: PixelFormat,
    },

    #[error("cannot pick an encoder for {0:?}")]
    UnknownExtension(PathBuf),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Borrowed, read-only view of an image held by a driver.
///
/// The view borrows the driver that owns the storage, so it cannot be kept
/// across the call that releases the buffer.
#[derive(Copy, Clone, Debug)]
pub struct ImageView<'a> {
    pub rows: u32,
    pub cols: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// Pixel bytes of row `r`, without stride padding.
    pub fn row(&self, r: u32) -> Option<&'a [u8]> {
        if r >= self.rows {
            return None;
        }
        let start = r as usize * self.stride as usize;
        self.data
            .get(start..start + self.format.row_stride(self.cols))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Owned image storage used for driver buffer slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    rows: u32,
    cols: u32,
    stride: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Image {
    /// Allocates a zeroed, tightly packed image.
    pub fn new(rows: u32, cols: u32, format: PixelFormat) -> Self {
        let stride = format.row_stride(cols);
        Self {
            rows,
            cols,
            stride: stride as u32,
            format,
            data: vec![0; stride * rows as usize],
        }
    }

    /// Wraps existing pixel data, checking that it covers every row.
    pub fn from_data(
        rows: u32,
        cols: u32,
        stride: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        let row_bytes = format.row_stride(cols);
        if (stride as usize) < row_bytes {
            return Err(ImageError::Stride {
                stride,
                cols,
                format,
            });
        }
        let expected = match rows {
            0 => 0,
            rows => (rows as usize - 1) * stride as usize + row_bytes,
        };
        if data.len() < expected {
            return Err(ImageError::Size {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            stride,
            format,
            data,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            rows: self.rows,
            cols: self.cols,
            stride: self.stride,
            format: self.format,
            data: &self.data,
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} {} stride:{} len:{}",
            self.cols,
            self.rows,
            self.format,
            self.stride,
            self.data.len()
        )
    }
}

/// Converts `src` into a new, tightly packed image of `format`.
pub fn convert(src: &ImageView, format: PixelFormat) -> Result<Image, ImageError> {
    let row_fn: fn(&[u8], &mut [u8]) = match (src.format, format) {
        (from, to) if from == to => |s, d| d.copy_from_slice(s),
        (PixelFormat::Yuv422, PixelFormat::Mono8) => yuyv_to_mono8,
        (PixelFormat::Yuv422, PixelFormat::Rgb8) => yuyv_to_rgb8,
        (PixelFormat::Yuv422, PixelFormat::Bgr8) => yuyv_to_bgr8,
        (PixelFormat::Mono8, PixelFormat::Rgb8 | PixelFormat::Bgr8) => mono8_to_rgb8,
        (PixelFormat::Mono16, PixelFormat::Mono8) => mono16_to_mono8,
        (PixelFormat::Rgb8, PixelFormat::Mono8) => rgb8_to_mono8,
        (PixelFormat::Bgr8, PixelFormat::Mono8) => bgr8_to_mono8,
        (PixelFormat::Rgb8, PixelFormat::Bgr8) | (PixelFormat::Bgr8, PixelFormat::Rgb8) => {
            swap_red_blue
        }
        (from, to) => return Err(ImageError::Unsupported { from, to }),
    };

    let mut dst = Image::new(src.rows, src.cols, format);
    let dst_stride = dst.stride as usize;
    if dst_stride == 0 {
        return Ok(dst);
    }
    for (r, dst_row) in dst.data.chunks_exact_mut(dst_stride).enumerate() {
        let src_row = src.row(r as u32).ok_or(ImageError::Size {
            expected: (r + 1) * src.stride as usize,
            actual: src.data.len(),
        })?;
        row_fn(src_row, dst_row);
    }
    debug!(from = %src.format, to = %format, rows = src.rows, cols = src.cols, "converted");
    Ok(dst)
}

fn yuyv_to_mono8(src: &[u8], dst: &mut [u8]) {
    for (pair, out) in src.chunks_exact(4).zip(dst.chunks_mut(2)) {
        out[0] = pair[0];
        if let Some(y1) = out.get_mut(1) {
            *y1 = pair[2];
        }
    }
}

fn yuyv_to_rgb8(src: &[u8], dst: &mut [u8]) {
    for (pair, out) in src.chunks_exact(4).zip(dst.chunks_mut(6)) {
        let (y0, u, y1, v) = (pair[0], pair[1], pair[2], pair[3]);
        let (r, g, b) = yuv_to_rgb(y0, u, v);
        out[..3].copy_from_slice(&[r, g, b]);
        if out.len() == 6 {
            let (r, g, b) = yuv_to_rgb(y1, u, v);
            out[3..].copy_from_slice(&[r, g, b]);
        }
    }
}

fn yuyv_to_bgr8(src: &[u8], dst: &mut [u8]) {
    yuyv_to_rgb8(src, dst);
    swap_in_place(dst);
}

fn mono8_to_rgb8(src: &[u8], dst: &mut [u8]) {
    for (y, out) in src.iter().zip(dst.chunks_exact_mut(3)) {
        out.fill(*y);
    }
}

fn mono16_to_mono8(src: &[u8], dst: &mut [u8]) {
    for (sample, out) in src.chunks_exact(2).zip(dst.iter_mut()) {
        *out = sample[1];
    }
}

fn rgb8_to_mono8(src: &[u8], dst: &mut [u8]) {
    for (px, out) in src.chunks_exact(3).zip(dst.iter_mut()) {
        *out = luma(px[0], px[1], px[2]);
    }
}

fn bgr8_to_mono8(src: &[u8], dst: &mut [u8]) {
    for (px, out) in src.chunks_exact(3).zip(dst.iter_mut()) {
        *out = luma(px[2], px[1], px[0]);
    }
}

fn swap_red_blue(src: &[u8], dst: &mut [u8]) {
    dst.copy_from_slice(src);
    swap_in_place(dst);
}

fn swap_in_place(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// BT.601 luma with 8-bit fixed point weights.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}

/// ITU-R BT.601 YUV to RGB, clamped to 0..=255.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v, y);
    let g = 0.714_14f32.mul_add(-v, 0.344_14f32.mul_add(-u, y));
    let b = 1.772f32.mul_add(u, y);

    let clamp = |val: f32| val.clamp(0.0, 255.0) as u8;
    (clamp(r), clamp(g), clamp(b))
}

/// On-disk encoders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Pick the encoder from the file extension.
    FromExtension,
    Jpeg,
    Pgm,
    Ppm,
}

impl FileFormat {
    /// Resolves [`FileFormat::FromExtension`] against `path`.
    pub fn resolve(self, path: &Path) -> Result<FileFormat, ImageError> {
        if self != FileFormat::FromExtension {
            return Ok(self);
        }
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("jpg" | "jpeg") => Ok(FileFormat::Jpeg),
            Some("pgm") => Ok(FileFormat::Pgm),
            Some("ppm") => Ok(FileFormat::Ppm),
            _ => Err(ImageError::UnknownExtension(path.to_path_buf())),
        }
    }

    /// Pixel format a capture is converted to before it is written in this
    /// format. PGM is grayscale; everything else is written in colour.
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            FileFormat::Pgm => PixelFormat::Mono8,
            _ => PixelFormat::Rgb8,
        }
    }
}

/// Encodes an 8-bit image to JPEG using turbojpeg.
///
/// Accepts [`PixelFormat::Mono8`], [`PixelFormat::Rgb8`] and
/// [`PixelFormat::Bgr8`] images.
pub fn encode_jpeg(img: &ImageView) -> Result<Vec<u8>, ImageError> {
    let (format, subsamp) = match img.format {
        PixelFormat::Mono8 => (turbojpeg::PixelFormat::GRAY, turbojpeg::Subsamp::Gray),
        PixelFormat::Rgb8 => (turbojpeg::PixelFormat::RGB, turbojpeg::Subsamp::Sub2x2),
        PixelFormat::Bgr8 => (turbojpeg::PixelFormat::BGR, turbojpeg::Subsamp::Sub2x2),
        from => {
            return Err(ImageError::Unsupported {
                from,
                to: PixelFormat::Rgb8,
            })
        }
    };
    let image = turbojpeg::Image {
        width: img.cols as usize,
        height: img.rows as usize,
        format,
        pixels: img.data,
        pitch: img.stride as usize,
    };
    match turbojpeg::compress(image, JPEG_QUALITY, subsamp) {
        Ok(buf) => Ok(buf.to_vec()),
        Err(e) => Err(ImageError::Codec(e.to_string())),
    }
}

/// Encodes a binary PGM (`Mono8`) or PPM (`Rgb8`) image.
pub fn encode_pnm(img: &ImageView) -> Result<Vec<u8>, ImageError> {
    let magic = match img.format {
        PixelFormat::Mono8 => "P5",
        PixelFormat::Rgb8 => "P6",
        from => {
            return Err(ImageError::Unsupported {
                from,
                to: PixelFormat::Rgb8,
            })
        }
    };
    let header = format!("{magic}\n{} {}\n255\n", img.cols, img.rows);
    let mut out = Vec::with_capacity(header.len() + img.format.row_stride(img.cols) * img.rows as usize);
    out.extend_from_slice(header.as_bytes());
    for r in 0..img.rows {
        let row = img.row(r).ok_or(ImageError::Size {
            expected: (r as usize + 1) * img.stride as usize,
            actual: img.data.len(),
        })?;
        out.extend_from_slice(row);
    }
    Ok(out)
}

/// Encodes `img` with the encoder selected by `format` and writes it to `path`.
pub fn save(img: &ImageView, path: &Path, format: FileFormat) -> Result<(), ImageError> {
    let bytes = match format.resolve(path)? {
        FileFormat::Jpeg => encode_jpeg(img)?,
        format @ (FileFormat::Pgm | FileFormat::Ppm) => {
            let to = format.pixel_format();
            if img.format != to {
                return Err(ImageError::Unsupported {
                    from: img.format,
                    to,
                });
            }
            encode_pnm(img)?
        }
        FileFormat::FromExtension => return Err(ImageError::UnknownExtension(path.to_path_buf())),
    };
    std::fs::write(path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "image saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuyv(rows: u32, cols: u32, y: u8, u: u8, v: u8) -> Image {
        let mut img = Image::new(rows, cols, PixelFormat::Yuv422);
        for px in img.data_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&[y, u, y, v]);
        }
        img
    }

    #[test]
    fn test_row_stride() {
        assert_eq!(PixelFormat::Mono8.row_stride(1280), 1280);
        assert_eq!(PixelFormat::Yuv422.row_stride(1280), 2560);
        assert_eq!(PixelFormat::Rgb8.row_stride(1280), 3840);
    }

    #[test]
    fn test_yuyv_to_mono8_takes_luma() {
        let src = yuyv(4, 8, 200, 10, 250);
        let dst = convert(&src.view(), PixelFormat::Mono8).unwrap();
        assert_eq!(dst.rows(), 4);
        assert_eq!(dst.cols(), 8);
        assert!(dst.data().iter().all(|&y| y == 200));
    }

    #[test]
    fn test_convert_honours_stride() {
        // 2 rows x 2 cols of mono8 with 2 bytes of padding per row
        let data = vec![1, 2, 0xee, 0xee, 3, 4, 0xee, 0xee];
        let src = Image::from_data(2, 2, 4, PixelFormat::Mono8, data).unwrap();
        let dst = convert(&src.view(), PixelFormat::Mono8).unwrap();
        assert_eq!(dst.stride(), 2);
        assert_eq!(dst.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_neutral_yuv_is_gray() {
        let src = yuyv(2, 2, 128, 128, 128);
        let dst = convert(&src.view(), PixelFormat::Rgb8).unwrap();
        assert!(dst.data().iter().all(|&c| c == 128));
    }

    #[test]
    fn test_rgb_bgr_swap() {
        let src = Image::from_data(1, 1, 3, PixelFormat::Rgb8, vec![10, 20, 30]).unwrap();
        let dst = convert(&src.view(), PixelFormat::Bgr8).unwrap();
        assert_eq!(dst.data(), &[30, 20, 10]);
    }

    #[test]
    fn test_unsupported_conversion() {
        let src = Image::new(2, 2, PixelFormat::Mono8);
        let err = convert(&src.view(), PixelFormat::Yuv422).unwrap_err();
        assert!(matches!(err, ImageError::Unsupported { .. }));
    }

    #[test]
    fn test_short_data_rejected() {
        let err = Image::from_data(2, 4, 4, PixelFormat::Mono8, vec![0; 5]).unwrap_err();
        assert!(matches!(
            err,
            ImageError::Size {
                expected: 8,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_resolve_from_extension() {
        let f = FileFormat::FromExtension;
        assert_eq!(f.resolve(Path::new("a.JPG")).unwrap(), FileFormat::Jpeg);
        assert_eq!(f.resolve(Path::new("a.pgm")).unwrap(), FileFormat::Pgm);
        assert!(f.resolve(Path::new("a.bmp")).is_err());
        assert_eq!(
            FileFormat::Ppm.resolve(Path::new("a.bmp")).unwrap(),
            FileFormat::Ppm
        );
    }

    #[test]
    fn test_pgm_header() {
        let img = Image::new(2, 3, PixelFormat::Mono8);
        let pgm = encode_pnm(&img.view()).unwrap();
        assert!(pgm.starts_with(b"P5\n3 2\n255\n"));
        assert_eq!(pgm.len(), b"P5\n3 2\n255\n".len() + 6);
    }

    #[test]
    fn test_pnm_format_must_match_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = Image::new(2, 2, PixelFormat::Rgb8);
        let path = dir.path().join("frame.pgm");
        let err = save(&rgb.view(), &path, FileFormat::FromExtension).unwrap_err();
        assert!(matches!(
            err,
            ImageError::Unsupported {
                from: PixelFormat::Rgb8,
                to: PixelFormat::Mono8
            }
        ));
        assert!(!path.exists());

        let gray = Image::new(2, 2, PixelFormat::Mono8);
        assert!(save(&gray.view(), &path, FileFormat::Ppm).is_err());
        assert_eq!(FileFormat::Pgm.pixel_format(), PixelFormat::Mono8);
        assert_eq!(FileFormat::Jpeg.pixel_format(), PixelFormat::Rgb8);
    }
}
