//! Post-processing of rendered buffers into displayable images.

use crate::error::{RenderError, Result};
use image::{
    EncodableLayout, GrayImage, ImageBuffer, Luma, PixelWithColorType, Rgba, Rgba32FImage, RgbaImage,
};
use ngp_data::npy::read_npy;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Divide RGB by alpha in place. Pixels with zero alpha become black.
pub fn unpremultiply_alpha(image: &mut Rgba32FImage) {
    for pixel in image.pixels_mut() {
        let a = pixel[3];
        for c in 0..3 {
            pixel[c] = if a != 0.0 { pixel[c] / a } else { 0.0 };
        }
    }
}

/// sRGB transfer function.
pub fn linear_to_srgb(v: f32) -> f32 {
    const LIMIT: f32 = 0.003_130_8;
    if v > LIMIT {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    } else {
        12.92 * v
    }
}

/// Clip to `[0, 1]` and round to 8 bits.
pub fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Turn an engine color buffer (linear, premultiplied) into an 8-bit image.
pub fn encode_color(image: &Rgba32FImage) -> RgbaImage {
    let mut linear = image.clone();
    unpremultiply_alpha(&mut linear);
    RgbaImage::from_fn(linear.width(), linear.height(), |x, y| {
        let p = linear.get_pixel(x, y);
        Rgba([
            quantize(linear_to_srgb(p[0])),
            quantize(linear_to_srgb(p[1])),
            quantize(linear_to_srgb(p[2])),
            quantize(p[3]),
        ])
    })
}

/// Greyscale visualisation of a depth map, nearest surfaces brightest.
///
/// Non-finite and non-positive depths are treated as "no hit" and drawn black.
pub fn tonemap_depth(depth: &[f32], width: u32, height: u32) -> GrayImage {
    let valid = |d: f32| d.is_finite() && d > 0.0;
    let (near, far) = depth
        .iter()
        .copied()
        .filter(|d| valid(*d))
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), d| {
            (lo.min(d), hi.max(d))
        });
    let span = far - near;

    GrayImage::from_fn(width, height, |x, y| {
        let d = depth[(y * width + x) as usize];
        if !valid(d) {
            return Luma([0]);
        }
        let t = if span > 0.0 { (d - near) / span } else { 0.0 };
        Luma([quantize(1.0 - t)])
    })
}

/// Tone-map every `.npy` depth map in `src` into `<stem>.png` in `dst`.
/// Returns the number of images written.
#[tracing::instrument(skip_all, fields(src = %src.display()))]
pub fn tonemap_folder(src: &Path, dst: &Path) -> Result<usize> {
    let entries = fs::read_dir(src).map_err(|source| RenderError::Io {
        path: src.to_path_buf(),
        source,
    })?;
    let mut inputs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "npy"))
        .collect();
    inputs.sort();

    fs::create_dir_all(dst).map_err(|source| RenderError::Io {
        path: dst.to_path_buf(),
        source,
    })?;

    for input in &inputs {
        let array = read_npy(input)?;
        let [h, w] = array.shape[..] else {
            return Err(RenderError::InvalidInput(format!(
                "{} has shape {:?}, expected a 2-D depth map",
                input.display(),
                array.shape
            )));
        };
        let image = tonemap_depth(&array.data, w as u32, h as u32);
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("depth");
        let out = dst.join(format!("{stem}.png"));
        debug!(path = %out.display(), "Writing depth preview");
        save_image(&image, &out)?;
    }

    info!("Tone-mapped {} depth maps into {}", inputs.len(), dst.display());
    Ok(inputs.len())
}

/// Output name for an encoded frame: `.png` appended when there is no
/// extension, any other extension replaced.
pub fn normalize_png_name(path: &Path) -> PathBuf {
    path.with_extension("png")
}

pub(crate) fn save_image<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, path: &Path) -> Result<()>
where
    P: PixelWithColorType,
    [P::Subpixel]: EncodableLayout,
{
    ngp_data::json::ensure_parent_dir(path)?;
    image.save(path).map_err(|source| RenderError::Image {
        path: path.to_path_buf(),
        source,
    })
}
