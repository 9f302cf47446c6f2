//! Remote storage sync through `aws s3 sync`.

use crate::command;
use crate::error::{PipelineError, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::info;

pub fn sync_command(aws: &str, from: &str, to: &str) -> Command {
    let mut cmd = Command::new(aws);
    cmd.args(["s3", "sync", from, to]);
    cmd
}

/// Fetch `url` into `dir`, creating it first.
pub fn download(aws: &str, url: &str, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    info!("Download data from {}", url);
    command::run(sync_command(aws, url, &dir.to_string_lossy()))
}

pub fn upload(aws: &str, dir: &Path, url: &str) -> Result<()> {
    info!("Upload {} to {}", dir.display(), url);
    command::run(sync_command(aws, &dir.to_string_lossy(), url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_command_line() {
        let cmd = sync_command("aws", "s3://bucket/nerf/lego/", "data/lego");
        assert_eq!(
            command::describe(&cmd),
            "aws s3 sync s3://bucket/nerf/lego/ data/lego"
        );
    }

    #[test]
    fn test_failed_download_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = download("ngp-no-such-aws", "s3://bucket/x/", &dir.path().join("x")).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalCommand { .. }));
        assert!(dir.path().join("x").is_dir());
    }
}
