//! Density extraction over a grid of fixed-size cubes.
//!
//! The scene's render box is divided into cubes of `scale * cube_size`
//! engine units. Each cube is sampled separately and written as
//! `density_<i>` plus a `density_<i>.json` record of its bounds and
//! resolution, `i` being the cube's position in iteration order.

use crate::error::{RenderError, Result};
use crate::progress::progress_bar;
use crate::tonemap::{quantize, save_image};
use glam::{IVec3, UVec3};
use image::{GrayImage, Luma};
use ngp_data::json::write_json;
use ngp_data::npy::write_npy;
use ngp_data::{BoundingBox, SceneConfig};
use ngp_engine::{DensityGrid, Testbed};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Integer cube coordinates covering a bounding box, upper bound exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeGrid {
    pub min: IVec3,
    pub max: IVec3,
    /// Edge length of one cube in engine units.
    pub cube_extent: f32,
}

/// One cube of a [`CubeGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cube {
    pub index: usize,
    pub coord: IVec3,
    pub aabb: BoundingBox,
}

impl CubeGrid {
    pub fn from_aabb(aabb: &BoundingBox, scale: f32, cube_size: f32) -> Result<Self> {
        let cube_extent = scale * cube_size;
        if !(cube_extent.is_finite() && cube_extent > 0.0) {
            return Err(RenderError::InvalidInput(format!(
                "cube extent must be positive, got scale {scale} * cube size {cube_size}"
            )));
        }
        Ok(Self {
            min: (aabb.p_min / cube_extent).floor().as_ivec3(),
            max: (aabb.p_max / cube_extent).ceil().as_ivec3(),
            cube_extent,
        })
    }

    /// Number of cubes along each axis.
    pub fn extents(&self) -> UVec3 {
        (self.max - self.min).max(IVec3::ZERO).as_uvec3()
    }

    pub fn len(&self) -> usize {
        let e = self.extents();
        e.x as usize * e.y as usize * e.z as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cubes with `x` outermost and `z` innermost, indices counting from 0.
    pub fn iter(&self) -> impl Iterator<Item = Cube> + '_ {
        let (min, max) = (self.min, self.max);
        (min.x..max.x)
            .flat_map(move |x| {
                (min.y..max.y)
                    .flat_map(move |y| (min.z..max.z).map(move |z| IVec3::new(x, y, z)))
            })
            .enumerate()
            .map(|(index, coord)| Cube {
                index,
                coord,
                aabb: BoundingBox::new(
                    coord.as_vec3() * self.cube_extent,
                    (coord + IVec3::ONE).as_vec3() * self.cube_extent,
                ),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DensityOutput {
    /// Raw `f32` grid as `density_<i>.npy`, shape `(z, y, x)`.
    #[default]
    Grid,
    /// Thresholded z-slices tiled into one greyscale `density_<i>.png`.
    PngSlices,
}

#[derive(Debug, Clone)]
pub struct DensityOptions {
    pub snapshot: PathBuf,
    pub scene_config: PathBuf,
    pub output_dir: PathBuf,
    pub voxels_per_meter: u32,
    pub threshold: f32,
    pub density_range: f32,
    /// Cube edge in meters.
    pub cube_size: f32,
    pub output: DensityOutput,
    pub show_progress: bool,
}

impl DensityOptions {
    pub fn new(
        snapshot: impl Into<PathBuf>,
        scene_config: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            snapshot: snapshot.into(),
            scene_config: scene_config.into(),
            output_dir: output_dir.into(),
            voxels_per_meter: 256,
            threshold: 2.5,
            density_range: 4.0,
            cube_size: 4.0,
            output: DensityOutput::Grid,
            show_progress: false,
        }
    }

    pub fn with_resolution(mut self, voxels_per_meter: u32) -> Self {
        self.voxels_per_meter = voxels_per_meter;
        self
    }

    pub fn with_threshold(mut self, threshold: f32, density_range: f32) -> Self {
        self.threshold = threshold;
        self.density_range = density_range;
        self
    }

    pub fn with_cube_size(mut self, cube_size: f32) -> Self {
        self.cube_size = cube_size;
        self
    }

    pub fn with_output(mut self, output: DensityOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    /// Grid resolution requested from the engine for one cube.
    pub fn cube_resolution(&self) -> u32 {
        (self.voxels_per_meter as f32 * self.cube_size).round() as u32
    }

    /// Size of one cube's `f32` grid in memory.
    pub fn cube_grid_bytes(&self) -> u64 {
        u64::from(self.cube_resolution()).pow(3) * 4
    }
}

/// Per-cube grid size above which extraction warns about memory use.
pub const LARGE_CUBE_GRID_BYTES: u64 = 1 << 30;

/// Contents of `density_<i>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityCubeInfo {
    pub ngp_render_aabb: BoundingBox,
    pub res: [u32; 3],
}

#[derive(Debug, Clone)]
pub struct DensitySummary {
    pub output_dir: PathBuf,
    pub cubes: usize,
}

fn require_file(path: &Path, extension: &str) -> Result<()> {
    if path.extension().is_none_or(|ext| ext != extension) {
        return Err(RenderError::InvalidInput(format!(
            "{} should be a .{extension} file",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(RenderError::MissingFile(path.to_path_buf()));
    }
    Ok(())
}

/// Extract density for every cube of the scene's render box.
///
/// Cubes are extracted one after the other; the first engine failure aborts
/// the run and leaves the cubes written so far on disk.
#[tracing::instrument(skip_all, fields(out = %options.output_dir.display()))]
pub fn extract_density(engine: &mut dyn Testbed, options: &DensityOptions) -> Result<DensitySummary> {
    require_file(&options.snapshot, "msgpack")?;
    require_file(&options.scene_config, "json")?;

    info!("Loading snapshot {}", options.snapshot.display());
    engine.load_snapshot(&options.snapshot)?;
    engine.set_training(false);

    info!("Loading render aabb from {}", options.scene_config.display());
    let scene = SceneConfig::load(&options.scene_config)?;
    let grid = CubeGrid::from_aabb(&scene.render_aabb, scene.scale, options.cube_size)?;
    let resolution = options.cube_resolution();
    if resolution == 0 {
        return Err(RenderError::InvalidInput(
            "density resolution rounds to zero voxels per cube".into(),
        ));
    }
    if options.cube_grid_bytes() > LARGE_CUBE_GRID_BYTES {
        warn!(
            "Each cube is a {}^3 grid ({:.1} GB); lower the resolution or cube size if memory is short",
            resolution,
            options.cube_grid_bytes() as f64 / 1e9
        );
    }

    fs::create_dir_all(&options.output_dir).map_err(|source| RenderError::Io {
        path: options.output_dir.clone(),
        source,
    })?;

    info!(
        cubes = grid.len(),
        resolution,
        "Extracting density over cube grid {} to {}",
        grid.min,
        grid.max
    );
    let progress = progress_bar(grid.len() as u64, options.show_progress, "Density", "cubes");

    for cube in grid.iter() {
        let density = engine.compute_density_grid(resolution, &cube.aabb)?;
        let stem = options.output_dir.join(format!("density_{}", cube.index));
        match options.output {
            DensityOutput::Grid => {
                write_npy(&stem.with_extension("npy"), &density.shape(), &density.values)?;
            }
            DensityOutput::PngSlices => {
                let slices = density_slices(&density, options.threshold, options.density_range);
                save_image(&slices, &stem.with_extension("png"))?;
            }
        }

        let r = density.resolution;
        write_json(
            &stem.with_extension("json"),
            &DensityCubeInfo {
                ngp_render_aabb: cube.aabb,
                res: [r.x, r.y, r.z],
            },
            true,
        )?;
        debug!(index = cube.index, coord = %cube.coord, "Cube written");
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(DensitySummary {
        output_dir: options.output_dir.clone(),
        cubes: grid.len(),
    })
}

/// Tile the z-slices of a grid into one greyscale image, row-major,
/// `ceil(sqrt(z))` slices per row.
pub fn density_slices(grid: &DensityGrid, threshold: f32, density_range: f32) -> GrayImage {
    let r = grid.resolution;
    let columns = (r.z as f32).sqrt().ceil().max(1.0) as u32;
    let rows = r.z.div_ceil(columns);
    let range = if density_range > 0.0 { density_range } else { 1.0 };

    let mut image = GrayImage::new(columns * r.x, rows.max(1) * r.y);
    for z in 0..r.z {
        let (ox, oy) = ((z % columns) * r.x, (z / columns) * r.y);
        for y in 0..r.y {
            for x in 0..r.x {
                let v = (grid.get(x, y, z) - threshold) / range;
                image.put_pixel(ox + x, oy + y, Luma([quantize(v)]));
            }
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use ngp_data::npy::read_npy;
    use ngp_engine::SyntheticTestbed;

    fn fixture(dir: &Path, p_max: f32) -> (PathBuf, PathBuf) {
        let network = dir.join("base.json");
        fs::write(&network, "{}").unwrap();
        let mut engine = SyntheticTestbed::new();
        engine.reload_network(&network).unwrap();
        let snapshot = dir.join("snap_20000.msgpack");
        engine.save_snapshot(&snapshot).unwrap();

        let config = dir.join("nerf_config.json");
        let scene = serde_json::json!({
            "scale": 1.0,
            "ngp_render_aabb": {"p_min": [0.0, 0.0, 0.0], "p_max": [p_max, p_max, p_max]},
        });
        fs::write(&config, scene.to_string()).unwrap();
        (snapshot, config)
    }

    #[test]
    fn test_eight_cubes_for_divisible_box() {
        let aabb = BoundingBox::new(Vec3::ZERO, Vec3::splat(8.0));
        let grid = CubeGrid::from_aabb(&aabb, 1.0, 4.0).unwrap();
        assert_eq!(grid.min, IVec3::ZERO);
        assert_eq!(grid.max, IVec3::splat(2));
        assert_eq!(grid.len(), 8);

        let cubes: Vec<Cube> = grid.iter().collect();
        assert_eq!(cubes.len(), 8);
        assert_eq!(
            cubes.iter().map(|c| c.index).collect::<Vec<_>>(),
            (0..8).collect::<Vec<_>>()
        );
        assert_eq!(cubes[0].coord, IVec3::new(0, 0, 0));
        assert_eq!(cubes[1].coord, IVec3::new(0, 0, 1));
        assert_eq!(cubes[2].coord, IVec3::new(0, 1, 0));
        assert_eq!(cubes[4].coord, IVec3::new(1, 0, 0));
        assert_eq!(cubes[7].aabb.p_min, Vec3::splat(4.0));
        assert_eq!(cubes[7].aabb.p_max, Vec3::splat(8.0));
    }

    #[test]
    fn test_default_cube_grid_is_large() {
        let options = DensityOptions::new("snap.msgpack", "nerf_config.json", "density");
        assert_eq!(options.cube_resolution(), 1024);
        assert_eq!(options.cube_grid_bytes(), 4u64 << 30);
        assert!(options.cube_grid_bytes() > LARGE_CUBE_GRID_BYTES);

        let small = options.with_resolution(16).with_cube_size(2.0);
        assert_eq!(small.cube_grid_bytes(), 32 * 32 * 32 * 4);
        assert!(small.cube_grid_bytes() < LARGE_CUBE_GRID_BYTES);
    }

    #[test]
    fn test_partial_cubes_round_outward() {
        let aabb = BoundingBox::new(Vec3::new(-1.0, 0.5, 0.0), Vec3::new(2.5, 1.0, 4.0));
        let grid = CubeGrid::from_aabb(&aabb, 0.5, 2.0).unwrap();
        assert_eq!(grid.min, IVec3::new(-1, 0, 0));
        assert_eq!(grid.max, IVec3::new(3, 1, 4));
        assert_eq!(grid.len(), 16);
        assert_eq!(grid.iter().count(), grid.len());
    }

    #[test]
    fn test_iteration_is_reproducible() {
        let aabb = BoundingBox::new(Vec3::splat(-3.0), Vec3::splat(5.0));
        let grid = CubeGrid::from_aabb(&aabb, 1.0, 2.0).unwrap();
        let a: Vec<Cube> = grid.iter().collect();
        let b: Vec<Cube> = grid.iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let aabb = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        assert!(CubeGrid::from_aabb(&aabb, 0.0, 4.0).is_err());
    }

    #[test]
    fn test_extract_writes_grid_and_metadata_per_cube() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshot, config) = fixture(dir.path(), 8.0);
        let out = dir.path().join("density");
        let options = DensityOptions::new(snapshot, config, &out).with_resolution(2);

        let mut engine = SyntheticTestbed::new();
        let summary = extract_density(&mut engine, &options).unwrap();
        assert_eq!(summary.cubes, 8);
        assert_eq!(engine.stats().density_queries, 8);

        for i in 0..8 {
            let grid = read_npy(&out.join(format!("density_{i}.npy"))).unwrap();
            assert_eq!(grid.shape, vec![8, 8, 8]);
        }
        let info: DensityCubeInfo = serde_json::from_str(
            &fs::read_to_string(out.join("density_1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(info.res, [8, 8, 8]);
        assert_eq!(info.ngp_render_aabb.p_min, Vec3::new(0.0, 0.0, 4.0));
        assert_eq!(info.ngp_render_aabb.p_max, Vec3::new(4.0, 4.0, 8.0));
    }

    #[test]
    fn test_extract_png_slices() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshot, config) = fixture(dir.path(), 4.0);
        let out = dir.path().join("density");
        let options = DensityOptions::new(snapshot, config, &out)
            .with_resolution(1)
            .with_output(DensityOutput::PngSlices);

        extract_density(&mut SyntheticTestbed::new(), &options).unwrap();
        let image = image::open(out.join("density_0.png")).unwrap().to_luma8();
        // 4 slices of 4x4 tiled 2 per row.
        assert_eq!(image.dimensions(), (8, 8));
        assert!(out.join("density_0.json").is_file());
        assert!(!out.join("density_0.npy").exists());
    }

    #[test]
    fn test_slice_thresholding() {
        let grid = DensityGrid {
            resolution: UVec3::new(1, 1, 3),
            values: vec![0.0, 4.5, 100.0],
        };
        let image = density_slices(&grid, 2.5, 4.0);
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(1, 0)[0], 128);
        assert_eq!(image.get_pixel(0, 1)[0], 255);
    }

    #[test]
    fn test_wrong_extensions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshot, config) = fixture(dir.path(), 4.0);
        let options = DensityOptions::new(&config, &config, dir.path().join("density"));
        assert!(matches!(
            extract_density(&mut SyntheticTestbed::new(), &options),
            Err(RenderError::InvalidInput(_))
        ));

        let options = DensityOptions::new(&snapshot, dir.path().join("missing.json"), dir.path());
        assert!(matches!(
            extract_density(&mut SyntheticTestbed::new(), &options),
            Err(RenderError::MissingFile(_))
        ));
    }
}
