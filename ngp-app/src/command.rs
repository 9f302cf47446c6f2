use crate::error::{PipelineError, Result};
use std::process::Command;
use tracing::debug;

/// Render a command as a shell-like string for logs and errors.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run to completion; spawn failures and non-zero exits are errors.
pub fn run(mut cmd: Command) -> Result<()> {
    let command = describe(&cmd);
    debug!("Running {}", command);
    let status = cmd.status().map_err(|e| PipelineError::ExternalCommand {
        command: command.clone(),
        reason: e.to_string(),
    })?;
    if !status.success() {
        return Err(PipelineError::ExternalCommand {
            command,
            reason: format!("exited with {status}"),
        });
    }
    Ok(())
}
