// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use camera_trigger::image::{
    self, convert, encode_jpeg, FileFormat, Image, ImageError, PixelFormat,
};
use std::error::Error;

fn yuyv_bars(rows: u32, cols: u32) -> Image {
    let mut img = Image::new(rows, cols, PixelFormat::Yuv422);
    let stride = img.stride() as usize;
    for row in img.data_mut().chunks_exact_mut(stride) {
        for (i, px) in row.chunks_exact_mut(4).enumerate() {
            let y = if i % 2 == 0 { 32 } else { 220 };
            px.copy_from_slice(&[y, 128, y, 128]);
        }
    }
    img
}

#[test]
fn test_formats() {
    let img = Image::new(1080, 1920, PixelFormat::Yuv422);
    println!("{}", img);
    assert_eq!(img.data().len(), 4147200);

    let img = Image::new(1080, 1920, PixelFormat::Rgb8);
    assert_eq!(img.data().len(), 6220800);

    let img = Image::new(1080, 1920, PixelFormat::Mono8);
    assert_eq!(img.data().len(), 2073600);
}

#[test]
fn test_padded_yuyv_to_rgb() -> Result<(), Box<dyn Error>> {
    // 4x2 pixels with 4 bytes of padding after each row
    let mut data = vec![0xEE; 12 * 2];
    for row in data.chunks_exact_mut(12) {
        row[..8].copy_from_slice(&[128, 128, 128, 128, 128, 128, 128, 128]);
    }
    let src = Image::from_data(2, 4, 12, PixelFormat::Yuv422, data)?;
    let rgb = convert(&src.view(), PixelFormat::Rgb8)?;

    assert_eq!(rgb.stride(), 12);
    assert_eq!(rgb.data().len(), 24);
    for px in rgb.data().chunks_exact(3) {
        assert!(px.iter().all(|&c| c.abs_diff(px[0]) <= 1));
    }
    Ok(())
}

#[test]
fn test_jpeg_roundtrip_header() -> Result<(), Box<dyn Error>> {
    let src = yuyv_bars(48, 64);
    for format in [PixelFormat::Mono8, PixelFormat::Rgb8, PixelFormat::Bgr8] {
        let img = convert(&src.view(), format)?;
        let jpeg = encode_jpeg(&img.view())?;
        let header = turbojpeg::read_header(&jpeg)?;
        assert_eq!((header.width, header.height), (64, 48), "{format}");
    }
    Ok(())
}

#[test]
fn test_jpeg_rejects_yuyv() {
    let src = yuyv_bars(4, 4);
    assert!(matches!(
        encode_jpeg(&src.view()),
        Err(ImageError::Unsupported { .. })
    ));
}

#[test]
fn test_save_by_extension() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let gray = convert(&yuyv_bars(8, 8).view(), PixelFormat::Mono8)?;

    let jpg = dir.path().join("frame.JPG");
    image::save(&gray.view(), &jpg, FileFormat::FromExtension)?;
    let header = turbojpeg::read_header(&std::fs::read(&jpg)?)?;
    assert_eq!((header.width, header.height), (8, 8));

    let pgm = dir.path().join("frame.pgm");
    image::save(&gray.view(), &pgm, FileFormat::FromExtension)?;
    assert!(std::fs::read(&pgm)?.starts_with(b"P5\n8 8\n255\n"));

    let raw = dir.path().join("frame.raw");
    assert!(matches!(
        image::save(&gray.view(), &raw, FileFormat::FromExtension),
        Err(ImageError::UnknownExtension(_))
    ));
    assert!(!raw.exists());

    // explicit format wins over the extension
    image::save(&gray.view(), &raw, FileFormat::Jpeg)?;
    assert!(raw.exists());
    Ok(())
}
