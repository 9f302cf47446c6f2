//! NGP Pipeline
//!
//! Command-line entry point for NeRF scenes:
//! - `train`: one training session, or chunked resumable training
//! - `render`: render a camera transform manifest from a snapshot
//! - `density`: extract per-cube density grids from a snapshot
//! - `tonemap`: turn a folder of depth `.npy` files into previews
//! - `compute-scene`: the full train/render/density/video pipeline

mod command;
mod config;
mod error;
mod pipeline;
mod scene;
mod sync;
mod video;

use clap::{Parser, Subcommand};
use config::{DEFAULT_CONFIG_DIR, DEFAULT_VIDEO_FPS, ExternalTools, PipelineConfig};
use error::Result;
use ngp_data::RunContext;
use ngp_engine::SyntheticTestbed;
use ngp_render::{
    CameraMode, CameraRenderer, CameraSource, DensityOptions, DensityOutput, RenderMode,
    RenderOptions, extract_density, tonemap::tonemap_folder,
};
use ngp_train::trainer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_STEP};
use ngp_train::{IncrementalTrainer, SessionConfig, TrainerConfig, TrainingSession};
use std::path::PathBuf;
use tracing::info;

/// NGP - NeRF scene training, rendering and density extraction
#[derive(Parser, Debug)]
#[command(name = "ngp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a scene, either in one session or in resumable chunks
    Train {
        /// Training transform manifest
        #[arg(long)]
        scene: Option<PathBuf>,

        /// Network configuration, used when no snapshot is loaded
        #[arg(long)]
        network: Option<PathBuf>,

        /// Snapshot to start from
        #[arg(long)]
        load_snapshot: Option<PathBuf>,

        /// Where to save the final snapshot (single session)
        #[arg(long, conflicts_with = "snapshot_dir")]
        save_snapshot: Option<PathBuf>,

        /// Step to train to (single session, default 100000)
        #[arg(long, conflicts_with = "snapshot_dir")]
        n_steps: Option<u32>,

        /// Train in chunks, keeping snap_<step>.msgpack files in this directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,

        #[arg(long, default_value_t = DEFAULT_MAX_STEP)]
        max_step: u32,

        /// Anneal depth supervision over the first steps
        #[arg(long)]
        depth_supervision: bool,

        /// Write per-step telemetry to this file
        #[arg(long)]
        training_info: Option<PathBuf>,
    },

    /// Render every frame of a camera transform manifest
    Render {
        #[arg(long)]
        snapshot: PathBuf,

        #[arg(long)]
        transforms: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,

        /// color, depth or confidence
        #[arg(long, default_value = "color")]
        mode: String,

        /// perspective or orthographic
        #[arg(long, default_value = "perspective")]
        camera_mode: String,

        #[arg(long, default_value_t = 4)]
        spp: u32,

        #[arg(long)]
        max_frames: Option<usize>,

        /// Render in an on-screen window
        #[arg(long)]
        display: bool,

        /// Also write tone-mapped previews of depth maps
        #[arg(long)]
        color_depth: bool,

        /// Use the manifest's frames as training views, with exact intrinsics
        #[arg(long)]
        training_views: bool,

        #[arg(long, default_value_t = 1920)]
        width: u32,

        #[arg(long, default_value_t = 1080)]
        height: u32,
    },

    /// Extract density grids over the scene's render box
    Density {
        #[arg(long)]
        snapshot: PathBuf,

        /// Engine scene configuration (nerf_config.json)
        #[arg(long)]
        scene_config: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,

        /// Voxels per meter. Each cube is a (resolution * cube_size)^3 f32
        /// grid, about 4 GB per cube with the defaults
        #[arg(long, default_value_t = 256)]
        resolution: u32,

        #[arg(long, default_value_t = 2.5)]
        threshold: f32,

        #[arg(long, default_value_t = 4.0)]
        density_range: f32,

        /// Cube edge in meters
        #[arg(long, default_value_t = 4.0)]
        cube_size: f32,

        /// Write tiled PNG slices instead of .npy grids
        #[arg(long)]
        png: bool,
    },

    /// Tone-map a folder of depth .npy files into PNG previews
    Tonemap { src: PathBuf, dst: PathBuf },

    /// Train, render, extract and assemble videos for a scene
    ComputeScene {
        /// Scene name under the data directory
        scene: String,

        /// Network config name
        #[arg(long, default_value = "base")]
        config: String,

        /// Data directory (default: $NGP_DATA_DIR, or ./data)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
        config_dir: PathBuf,

        /// Remote root to fetch missing scenes from and upload to
        #[arg(long)]
        remote: Option<String>,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,

        #[arg(long, default_value_t = DEFAULT_MAX_STEP)]
        max_step: u32,

        #[arg(long)]
        depth_supervision: bool,

        #[arg(long)]
        display: bool,

        #[arg(long)]
        max_frames: Option<usize>,

        /// Density voxels per meter; about 4 GB per cube with the defaults
        #[arg(long, default_value_t = 256)]
        density_resolution: u32,

        /// Density cube edge in meters
        #[arg(long, default_value_t = 4.0)]
        density_cube_size: f32,

        #[arg(long, default_value_t = DEFAULT_VIDEO_FPS)]
        fps: u32,

        #[arg(long)]
        skip_color: bool,

        #[arg(long)]
        skip_topview: bool,

        #[arg(long)]
        skip_depth: bool,

        #[arg(long)]
        skip_density: bool,

        #[arg(long)]
        skip_video: bool,

        /// Sync results to the remote when done
        #[arg(long)]
        upload: bool,

        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: String,

        #[arg(long, default_value = "aws")]
        aws: String,
    },
}

/// Logging configuration.
pub struct LoggingConfig {
    pub level: String,
}

fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(&LoggingConfig {
        level: args.log_level.clone(),
    });

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let show_progress = !args.quiet;
    // The native engine is not linked into this binary; every stage runs on
    // the CPU reference testbed.
    let mut engine = SyntheticTestbed::new();
    info!("Using the synthetic CPU testbed");

    match args.command {
        Commands::Train {
            scene,
            network,
            load_snapshot,
            save_snapshot,
            n_steps,
            snapshot_dir,
            chunk_size,
            max_step,
            depth_supervision,
            training_info,
        } => match snapshot_dir {
            Some(dir) => {
                let mut config = TrainerConfig::new(dir)
                    .with_steps(chunk_size, max_step)
                    .with_depth_supervision(depth_supervision)
                    .with_progress(show_progress);
                config.manifest = scene;
                config.network = network;
                config.resume_from = load_snapshot;
                config.training_info = training_info;

                let report = IncrementalTrainer::new(config).run(&mut engine)?;
                println!(
                    "Trained {} of {} chunks ({} skipped), final snapshot {}",
                    report.chunks_trained,
                    report.chunks_total,
                    report.chunks_skipped,
                    report.final_snapshot.display()
                );
            }
            None => {
                let config = SessionConfig {
                    scene,
                    network,
                    load_snapshot,
                    save_snapshot,
                    n_steps,
                    depth_supervision,
                    training_info,
                    show_progress,
                };
                let outcome = TrainingSession::run(&mut engine, &config)?;
                println!(
                    "Trained to step {} ({} steps run)",
                    outcome.final_step, outcome.steps_run
                );
            }
        },

        Commands::Render {
            snapshot,
            transforms,
            output_dir,
            mode,
            camera_mode,
            spp,
            max_frames,
            display,
            color_depth,
            training_views,
            width,
            height,
        } => {
            let mode: RenderMode = mode.parse()?;
            let camera_mode: CameraMode = camera_mode.parse()?;
            let source = if training_views {
                CameraSource::TrainingView
            } else {
                CameraSource::Pose
            };
            let options = RenderOptions::new(snapshot, transforms, output_dir)
                .with_mode(mode)
                .with_camera_mode(camera_mode)
                .with_camera_source(source)
                .with_spp(spp)
                .with_max_frames(max_frames)
                .with_display(display)
                .with_color_depth(color_depth)
                .with_resolution(width, height)
                .with_progress(show_progress);
            let summary = CameraRenderer::new(options).render(&mut engine)?;
            println!(
                "Rendered {} frames into {}",
                summary.frames_written,
                summary.output_dir.display()
            );
        }

        Commands::Density {
            snapshot,
            scene_config,
            output_dir,
            resolution,
            threshold,
            density_range,
            cube_size,
            png,
        } => {
            let output = if png {
                DensityOutput::PngSlices
            } else {
                DensityOutput::Grid
            };
            let options = DensityOptions::new(snapshot, scene_config, output_dir)
                .with_resolution(resolution)
                .with_threshold(threshold, density_range)
                .with_cube_size(cube_size)
                .with_output(output)
                .with_progress(show_progress);
            let summary = extract_density(&mut engine, &options)?;
            println!(
                "Extracted {} density cubes into {}",
                summary.cubes,
                summary.output_dir.display()
            );
        }

        Commands::Tonemap { src, dst } => {
            let count = tonemap_folder(&src, &dst)?;
            println!("Tone-mapped {} depth maps into {}", count, dst.display());
        }

        Commands::ComputeScene {
            scene,
            config,
            data_dir,
            config_dir,
            remote,
            chunk_size,
            max_step,
            depth_supervision,
            display,
            max_frames,
            density_resolution,
            density_cube_size,
            fps,
            skip_color,
            skip_topview,
            skip_depth,
            skip_density,
            skip_video,
            upload,
            ffmpeg,
            aws,
        } => {
            let mut pipeline = PipelineConfig::new(scene, config)
                .with_config_dir(config_dir)
                .with_remote(remote)
                .with_steps(chunk_size, max_step)
                .with_density(density_resolution, density_cube_size)
                .with_tools(ExternalTools { ffmpeg, aws })
                .with_progress(show_progress);
            if let Some(dir) = data_dir {
                pipeline = pipeline.with_data_dir(dir);
            }
            pipeline.depth_supervision = depth_supervision;
            pipeline.display = display;
            pipeline.max_frames = max_frames;
            pipeline.video_fps = fps;
            pipeline.skip_color = skip_color;
            pipeline.skip_topview = skip_topview;
            pipeline.skip_depth = skip_depth;
            pipeline.skip_density = skip_density;
            pipeline.skip_video = skip_video;
            pipeline.upload = upload;

            let ctx = RunContext::new();
            let info = pipeline::run_pipeline(&mut engine, &pipeline, &ctx)?;
            println!(
                "Scene {} done: {}",
                pipeline.scene,
                serde_json::to_string(&info).unwrap_or_default()
            );
        }
    }
    Ok(())
}
