//! Timed artifact transfers between the local and remote hosts.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::session::RemoteSession;
use crate::error::{PipelineError, TransferDirection};
use crate::plan::remote_join;

/// Summary of a recursive directory upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeUpload {
    /// Top-level entries that passed the name filter.
    pub matched: usize,
    pub files: usize,
    pub bytes: u64,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Copies artifacts through a session's file-transfer channel.
///
/// Every call opens its own channel and reports the wall time of the copy
/// alone.
pub struct ArtifactStager<'a> {
    session: &'a RemoteSession,
}

impl<'a> ArtifactStager<'a> {
    pub fn new(session: &'a RemoteSession) -> Self {
        Self { session }
    }

    /// Uploads `local` to `remote`, overwriting it.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<Duration, PipelineError> {
        self.put(local, remote).await.map(|(_, elapsed)| elapsed)
    }

    /// Downloads `remote` to `local`, overwriting it. Missing local parent
    /// directories are created.
    pub async fn download(&self, remote: &str, local: &Path) -> Result<Duration, PipelineError> {
        let transfer_err = |source| PipelineError::Transfer {
            direction: TransferDirection::Download,
            local: local.to_path_buf(),
            remote: remote.to_string(),
            source,
        };

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(transfer_err)?;
        }

        let start = Instant::now();
        let bytes = self
            .session
            .transport()
            .get(remote, local)
            .await
            .map_err(transfer_err)?;
        let elapsed = start.elapsed();
        debug!(
            "Downloaded {} -> {} ({} bytes in {:.3}s)",
            remote,
            local.display(),
            bytes,
            elapsed.as_secs_f64()
        );
        Ok(elapsed)
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<(u64, Duration), PipelineError> {
        let start = Instant::now();
        let bytes = self
            .session
            .transport()
            .put(local, remote)
            .await
            .map_err(|source| PipelineError::Transfer {
                direction: TransferDirection::Upload,
                local: local.to_path_buf(),
                remote: remote.to_string(),
                source,
            })?;
        let elapsed = start.elapsed();
        debug!(
            "Uploaded {} -> {} ({} bytes in {:.3}s)",
            local.display(),
            remote,
            bytes,
            elapsed.as_secs_f64()
        );
        Ok((bytes, elapsed))
    }

    /// Mirrors a local directory tree under `remote_dir`.
    ///
    /// When `name_filter` is set, only top-level entries whose name contains
    /// it (case-insensitive) are uploaded. Unreadable entries and failed
    /// files are logged and counted as skipped; an unreadable root or a
    /// remote directory that cannot be created aborts.
    pub async fn upload_tree(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        name_filter: Option<&str>,
    ) -> Result<TreeUpload, PipelineError> {
        let start = Instant::now();
        let filter = name_filter.map(str::to_lowercase);
        let mut summary = TreeUpload::default();

        self.session.ensure_directory(remote_dir).await?;

        let mut pending: Vec<(PathBuf, String, bool)> = vec![(
            local_dir.to_path_buf(),
            remote_dir.to_string(),
            true,
        )];

        while let Some((dir, remote, top_level)) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(source) if top_level => {
                    return Err(PipelineError::Transfer {
                        direction: TransferDirection::Upload,
                        local: dir,
                        remote,
                        source,
                    })
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    summary.skipped += 1;
                    continue;
                }
            };

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                        summary.skipped += 1;
                        continue;
                    }
                };
                let name = entry.file_name().to_string_lossy().to_string();
                if top_level {
                    if let Some(filter) = &filter {
                        if !name.to_lowercase().contains(filter.as_str()) {
                            continue;
                        }
                    }
                    summary.matched += 1;
                }

                let path = entry.path();
                let remote_item = remote_join(&remote, &name);
                if path.is_dir() {
                    self.session.ensure_directory(&remote_item).await?;
                    pending.push((path, remote_item, false));
                } else {
                    match self.put(&path, &remote_item).await {
                        Ok((bytes, _)) => {
                            info!(
                                "Uploaded {} ({:.1} MB)",
                                remote_item,
                                bytes as f64 / 1024.0 / 1024.0
                            );
                            summary.files += 1;
                            summary.bytes += bytes;
                        }
                        Err(e) => {
                            warn!(file = %path.display(), error = %e, "Skipping file");
                            summary.skipped += 1;
                        }
                    }
                }
            }
        }

        summary.elapsed = start.elapsed();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::DirTransport;
    use std::fs;

    fn session(root: &Path) -> RemoteSession {
        RemoteSession::from_transport(Box::new(DirTransport::new(root)), "mock", "")
    }

    #[tokio::test]
    async fn test_upload_download_round_trip_is_byte_identical() {
        let local = tempfile::TempDir::new().unwrap();
        let remote = tempfile::TempDir::new().unwrap();
        let session = session(remote.path());
        let stager = ArtifactStager::new(&session);

        let original: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let src = local.path().join("saved.pt");
        fs::write(&src, &original).unwrap();

        session.ensure_directory("/work").await.unwrap();
        stager.upload(&src, "/work/saved.pt").await.unwrap();
        let dest = local.path().join("back/saved_copy.pt");
        stager.download("/work/saved.pt", &dest).await.unwrap();

        assert_eq!(fs::read(&dest).unwrap(), original);
        session.close().await;
    }

    #[tokio::test]
    async fn test_upload_overwrites_destination() {
        let local = tempfile::TempDir::new().unwrap();
        let remote = tempfile::TempDir::new().unwrap();
        let session = session(remote.path());
        let stager = ArtifactStager::new(&session);

        let src = local.path().join("a.json");
        fs::write(&src, "first version, longer").unwrap();
        stager.upload(&src, "/a.json").await.unwrap();
        fs::write(&src, "second").unwrap();
        stager.upload(&src, "/a.json").await.unwrap();

        assert_eq!(fs::read_to_string(remote.path().join("a.json")).unwrap(), "second");
        session.close().await;
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_transfer_error() {
        let local = tempfile::TempDir::new().unwrap();
        let remote = tempfile::TempDir::new().unwrap();
        let session = session(remote.path());
        let stager = ArtifactStager::new(&session);

        let err = stager
            .download("/nope/results.pt", &local.path().join("results.pt"))
            .await
            .unwrap_err();
        match err {
            PipelineError::Transfer { direction, remote, .. } => {
                assert_eq!(direction, TransferDirection::Download);
                assert_eq!(remote, "/nope/results.pt");
            }
            other => panic!("unexpected error: {other}"),
        }
        session.close().await;
    }

    #[tokio::test]
    async fn test_upload_tree_with_filter() {
        let local = tempfile::TempDir::new().unwrap();
        let remote = tempfile::TempDir::new().unwrap();
        let hub = local.path().join("hub");
        fs::create_dir_all(hub.join("models--gpt2/snapshots/abc")).unwrap();
        fs::create_dir_all(hub.join("models--bert")).unwrap();
        fs::write(hub.join("models--gpt2/snapshots/abc/model.bin"), vec![7u8; 2048]).unwrap();
        fs::write(hub.join("models--gpt2/config.json"), "{}").unwrap();
        fs::write(hub.join("models--bert/model.bin"), "bert").unwrap();

        let session = session(remote.path());
        let stager = ArtifactStager::new(&session);
        let summary = stager
            .upload_tree(&hub, "/root/.cache/huggingface/hub", Some("GPT2"))
            .await
            .unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 2050);
        assert_eq!(summary.skipped, 0);
        let mirrored = remote.path().join("root/.cache/huggingface/hub/models--gpt2");
        assert!(mirrored.join("snapshots/abc/model.bin").is_file());
        assert!(!remote
            .path()
            .join("root/.cache/huggingface/hub/models--bert")
            .exists());
        session.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_tree_counts_unreadable_entries_as_skipped() {
        let local = tempfile::TempDir::new().unwrap();
        let remote = tempfile::TempDir::new().unwrap();
        let hub = local.path().join("hub");
        fs::create_dir_all(hub.join("models--gpt2")).unwrap();
        fs::write(hub.join("models--gpt2/config.json"), "{}").unwrap();
        std::os::unix::fs::symlink(
            hub.join("models--gpt2/missing.bin"),
            hub.join("models--gpt2/model.bin"),
        )
        .unwrap();

        let session = session(remote.path());
        let stager = ArtifactStager::new(&session);
        let summary = stager.upload_tree(&hub, "/hub", None).await.unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.files, 1);
        assert_eq!(summary.skipped, 1);
        assert!(remote.path().join("hub/models--gpt2/config.json").is_file());
        session.close().await;
    }

    #[tokio::test]
    async fn test_upload_tree_filter_without_match() {
        let local = tempfile::TempDir::new().unwrap();
        let remote = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(local.path().join("models--bert")).unwrap();
        fs::write(local.path().join("models--bert/model.bin"), "bert").unwrap();

        let session = session(remote.path());
        let stager = ArtifactStager::new(&session);
        let summary = stager
            .upload_tree(local.path(), "/hub", Some("gpt2"))
            .await
            .unwrap();

        assert_eq!(summary.matched, 0);
        assert_eq!(summary.files, 0);
        session.close().await;
    }
}
