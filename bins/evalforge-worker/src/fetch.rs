/// Fetching submission code and challenge packs
///
/// Both run untrusted URLs through external tools, so every call goes
/// through the bounded command runner. Failures here are infrastructure
/// failures from the job's point of view and may be retried.
use async_trait::async_trait;
use evalforge_common::pack::find_pack_root;
use futures_util::StreamExt;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::bounded::{run_bounded_command, with_deadline, BoundedOutcome};
use crate::error::EvalError;

/// Downloaded packs larger than this are refused
pub const MAX_PACK_BYTES: u64 = 256 * 1024 * 1024;

#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Check `repo_url` out into `dest`, which must not exist yet
    async fn fetch_repo(&self, repo_url: &str, dest: &Path) -> Result<(), EvalError>;
}

#[async_trait]
pub trait PackFetcher: Send + Sync {
    /// Materialise the pack under `dest` and return the pack root
    async fn fetch_pack(&self, pack_url: &str, dest: &Path) -> Result<PathBuf, EvalError>;
}

/// Only http(s) remotes may be cloned, submodules included
const GIT_TRANSPORTS: [&str; 6] = [
    "-c",
    "protocol.allow=never",
    "-c",
    "protocol.https.allow=always",
    "-c",
    "protocol.http.allow=always",
];

/// Shallow `git clone`
#[derive(Debug, Clone)]
pub struct GitFetcher {
    timeout: Duration,
    grace: Duration,
}

impl GitFetcher {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self { timeout, grace }
    }

    async fn clone_into(&self, url: &str, dest: &Path) -> Result<(), EvalError> {
        let mut cmd = Command::new("git");
        cmd.args(GIT_TRANSPORTS)
            .args(["clone", "--depth", "1", "--quiet", "--"])
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0");

        tracing::debug!(url, dest = %dest.display(), "Cloning repository");

        match run_bounded_command(cmd, self.timeout, self.grace).await {
            Ok(BoundedOutcome::Exited(output)) if output.success() => Ok(()),
            Ok(BoundedOutcome::Exited(output)) => Err(EvalError::TransientInfra(format!(
                "Failed to clone {}: {}",
                url,
                output.describe_failure("git clone")
            ))),
            Ok(BoundedOutcome::TimedOut) => Err(EvalError::TransientInfra(format!(
                "Cloning {} timed out after {}s",
                url,
                self.timeout.as_secs()
            ))),
            Err(e) => Err(EvalError::transient("Failed to start git", e)),
        }
    }
}

#[async_trait]
impl RepoFetcher for GitFetcher {
    async fn fetch_repo(&self, repo_url: &str, dest: &Path) -> Result<(), EvalError> {
        self.clone_into(repo_url, dest).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackSource {
    Git,
    Zip,
    /// Any tar flavour; GNU tar detects the compression itself
    Tar,
}

impl PackSource {
    pub fn from_url(pack_url: &str) -> Result<Self, EvalError> {
        let url = Url::parse(pack_url).map_err(|e| {
            EvalError::TransientInfra(format!("Invalid challenge pack URL {}: {}", pack_url, e))
        })?;
        let path = url.path().to_lowercase();

        Ok(if path.ends_with(".git") {
            PackSource::Git
        } else if path.ends_with(".zip") {
            PackSource::Zip
        } else {
            PackSource::Tar
        })
    }
}

/// Challenge packs over HTTP(S) archives or git
pub struct HttpPackFetcher {
    client: reqwest::Client,
    git: GitFetcher,
    timeout: Duration,
    grace: Duration,
}

impl HttpPackFetcher {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            git: GitFetcher::new(timeout, grace),
            timeout,
            grace,
        }
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), EvalError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EvalError::transient("Failed to download challenge pack", e))?;

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| EvalError::transient("Failed to create pack archive", e))?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| EvalError::transient("Challenge pack download interrupted", e))?;
            written += chunk.len() as u64;
            if written > MAX_PACK_BYTES {
                return Err(EvalError::TransientInfra(format!(
                    "Challenge pack exceeds {} bytes",
                    MAX_PACK_BYTES
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| EvalError::transient("Failed to write pack archive", e))?;
        }
        file.flush()
            .await
            .map_err(|e| EvalError::transient("Failed to write pack archive", e))
    }
}

/// Unpack `archive` into `into` with the system `tar` / `unzip`
pub async fn extract_archive(
    source: PackSource,
    archive: &Path,
    into: &Path,
    timeout: Duration,
    grace: Duration,
) -> Result<(), EvalError> {
    tokio::fs::create_dir_all(into)
        .await
        .map_err(|e| EvalError::transient("Failed to create extraction directory", e))?;

    let (program, mut cmd) = match source {
        PackSource::Zip => {
            let mut cmd = Command::new("unzip");
            cmd.arg("-q").arg("-o").arg(archive).arg("-d").arg(into);
            ("unzip", cmd)
        }
        _ => {
            let mut cmd = Command::new("tar");
            cmd.arg("-xf").arg(archive).arg("-C").arg(into).arg("--no-same-owner");
            ("tar", cmd)
        }
    };
    cmd.kill_on_drop(true);

    match run_bounded_command(cmd, timeout, grace).await {
        Ok(BoundedOutcome::Exited(output)) if output.success() => Ok(()),
        Ok(BoundedOutcome::Exited(output)) => Err(EvalError::TransientInfra(format!(
            "Failed to extract challenge pack: {}",
            output.describe_failure(program)
        ))),
        Ok(BoundedOutcome::TimedOut) => Err(EvalError::TransientInfra(
            "Extracting challenge pack timed out".to_string(),
        )),
        Err(e) => Err(EvalError::transient(&format!("Failed to start {}", program), e)),
    }
}

#[async_trait]
impl PackFetcher for HttpPackFetcher {
    async fn fetch_pack(&self, pack_url: &str, dest: &Path) -> Result<PathBuf, EvalError> {
        let source = PackSource::from_url(pack_url)?;
        let extracted = dest.join("extracted");

        if source == PackSource::Git {
            self.git.clone_into(pack_url, &extracted).await?;
        } else {
            tokio::fs::create_dir_all(dest)
                .await
                .map_err(|e| EvalError::transient("Failed to create pack directory", e))?;
            let archive = dest.join("pack-archive");

            match with_deadline(self.timeout, self.download(pack_url, &archive)).await {
                BoundedOutcome::Exited(result) => result?,
                BoundedOutcome::TimedOut => {
                    return Err(EvalError::TransientInfra(format!(
                        "Downloading challenge pack timed out after {}s",
                        self.timeout.as_secs()
                    )))
                }
            }
            extract_archive(source, &archive, &extracted, self.timeout, self.grace).await?;
        }

        // A pack without an entrypoint is caught when the build context is
        // assembled; hand back the extraction root in that case.
        let root = tokio::task::spawn_blocking({
            let extracted = extracted.clone();
            move || find_pack_root(&extracted)
        })
        .await
        .ok()
        .flatten();

        Ok(root.unwrap_or(extracted))
    }
}
