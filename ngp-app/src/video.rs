//! Video assembly through `ffmpeg`.

use crate::command;
use crate::error::Result;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Frame file pattern the rendered sequences are expected to follow.
pub const FRAME_PATTERN: &str = "frame_%04d.png";

/// `ffmpeg` invocation encoding `<folder>/frame_%04d.png` into an H.264 mp4.
pub fn folder_to_video_command(ffmpeg: &str, folder: &Path, output: &Path, fps: u32) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-r")
        .arg(fps.to_string())
        .arg("-y")
        .arg("-i")
        .arg(folder.join(FRAME_PATTERN))
        .args(["-c:v", "libx264", "-vf"])
        .arg(format!("fps={fps},format=yuv420p"))
        .arg(output);
    cmd
}

/// `ffmpeg` invocation stacking videos side by side (or on top of each other).
pub fn merge_videos_command(ffmpeg: &str, inputs: &[&Path], output: &Path, horizontal: bool) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-y");
    for input in inputs {
        cmd.arg("-i").arg(input);
    }
    cmd.arg("-filter_complex")
        .arg(if horizontal { "hstack" } else { "vstack" })
        .arg(output);
    cmd
}

pub fn folder_to_video(ffmpeg: &str, folder: &Path, output: &Path, fps: u32) -> Result<()> {
    info!("Encoding {} into {}", folder.display(), output.display());
    command::run(folder_to_video_command(ffmpeg, folder, output, fps))
}

pub fn merge_videos(ffmpeg: &str, inputs: &[&Path], output: &Path) -> Result<()> {
    info!("Merging {} videos into {}", inputs.len(), output.display());
    command::run(merge_videos_command(ffmpeg, inputs, output, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command_line() {
        let cmd = folder_to_video_command("ffmpeg", Path::new("out/color"), Path::new("out/video.mp4"), 2);
        assert_eq!(
            command::describe(&cmd),
            "ffmpeg -r 2 -y -i out/color/frame_%04d.png -c:v libx264 -vf fps=2,format=yuv420p out/video.mp4"
        );
    }

    #[test]
    fn test_merge_command_line() {
        let cmd = merge_videos_command(
            "ffmpeg",
            &[Path::new("video.mp4"), Path::new("depth.mp4")],
            Path::new("result.mp4"),
            true,
        );
        assert_eq!(
            command::describe(&cmd),
            "ffmpeg -y -i video.mp4 -i depth.mp4 -filter_complex hstack result.mp4"
        );
    }
}
