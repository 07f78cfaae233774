use std::path::Path;

use anyhow::{bail, Result};
use tokio::process::Command;

/// Run a subprocess to completion, failing with its stderr on a non-zero exit.
/// Mirrors the coordinator/worker boundary's other shell-outs: the container
/// runtime's build/push/login surface is reached via the `docker` CLI rather
/// than hand-rolling a tar-stream build context.
async fn run(cmd: &str, args: &[&str], working_dir: Option<&Path>) -> Result<()> {
    let mut command = Command::new(cmd);
    command.args(args);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let output = command.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{cmd} {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
    }
    Ok(())
}

/// `docker build -t <tag> <context_dir>`.
pub async fn build_image(context_dir: &Path, tag: &str) -> Result<()> {
    run("docker", &["build", "-t", tag, "."], Some(context_dir)).await
}

/// `docker login` with the given credentials, then `docker push <tag>`.
pub async fn push_image(tag: &str, username: &str, password: &str) -> Result<()> {
    run(
        "docker",
        &["login", "--username", username, "--password", password],
        None,
    )
    .await?;
    run("docker", &["push", tag], None).await
}
