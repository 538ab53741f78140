// Upload hand-off for finished fragments
//
// Closed fragments are queued to a worker thread; submission never blocks
// the acquisition loop and failed uploads are not retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload rejected: {0}")]
    Rejected(String),
}

/// Moves a finished fragment somewhere else
pub trait Uploader: Send + Sync {
    fn upload(&self, path: &Path) -> Result<(), UploadError>;
}

/// Copies fragments into a spool directory picked up by an external shipper
pub struct SpoolDirUploader {
    dir: PathBuf,
}

impl SpoolDirUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Uploader for SpoolDirUploader {
    fn upload(&self, path: &Path) -> Result<(), UploadError> {
        let name = path
            .file_name()
            .ok_or_else(|| UploadError::Rejected(format!("{} has no file name", path.display())))?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::copy(path, self.dir.join(name))?;
        Ok(())
    }
}

/// Cloneable submission side of an [`UploadQueue`]
#[derive(Clone)]
pub struct UploadHandle {
    tx: Sender<PathBuf>,
}

impl UploadHandle {
    /// Queue a closed fragment. Returns false if the queue is full or gone.
    pub fn submit(&self, path: PathBuf) -> bool {
        match self.tx.try_send(path) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) => {
                log::warn!("[Upload] Queue full, not uploading {}", path.display());
                false
            }
            Err(TrySendError::Disconnected(path)) => {
                log::warn!("[Upload] Worker gone, not uploading {}", path.display());
                false
            }
        }
    }
}

pub struct UploadQueue {
    handle: Option<UploadHandle>,
    worker: Option<JoinHandle<()>>,
}

impl UploadQueue {
    pub fn start(uploader: Arc<dyn Uploader>, depth: usize, remove_after_upload: bool) -> Self {
        let (tx, rx) = bounded::<PathBuf>(depth.max(1));

        let worker = std::thread::Builder::new()
            .name("retrocap-upload".into())
            .spawn(move || {
                for path in rx.iter() {
                    match uploader.upload(&path) {
                        Ok(()) => log::info!("[Upload] Uploaded {}", path.display()),
                        Err(e) => log::error!("[Upload] Failed to upload {}: {}", path.display(), e),
                    }
                    if remove_after_upload {
                        if let Err(e) = std::fs::remove_file(&path) {
                            log::warn!("[Upload] Failed to remove {}: {}", path.display(), e);
                        }
                    }
                }
                log::debug!("[Upload] Worker exiting");
            })
            .expect("Failed to spawn upload worker thread");

        Self {
            handle: Some(UploadHandle { tx }),
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> Option<UploadHandle> {
        self.handle.clone()
    }

    pub fn submit(&self, path: PathBuf) -> bool {
        self.handle.as_ref().is_some_and(|h| h.submit(path))
    }

    /// Close the queue and wait for pending uploads to finish
    pub fn shutdown(&mut self) {
        self.handle.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl Uploader for Collecting {
        fn upload(&self, path: &Path) -> Result<(), UploadError> {
            self.seen.lock().push(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn uploads_in_order_and_drains_on_shutdown() {
        let uploader = Arc::new(Collecting::default());
        let mut queue = UploadQueue::start(uploader.clone(), 8, false);
        for i in 0..5 {
            assert!(queue.submit(PathBuf::from(format!("frag{i}.ts"))));
        }
        queue.shutdown();

        let seen = uploader.seen.lock();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], PathBuf::from("frag0.ts"));
        assert_eq!(seen[4], PathBuf::from("frag4.ts"));
    }

    #[test]
    fn spool_dir_copies_and_source_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let fragment = tmp.path().join("clip.mkv");
        std::fs::write(&fragment, b"fragment bytes").unwrap();
        let spool = tmp.path().join("spool");

        let mut queue = UploadQueue::start(Arc::new(SpoolDirUploader::new(&spool)), 2, true);
        assert!(queue.submit(fragment.clone()));
        queue.shutdown();

        assert_eq!(std::fs::read(spool.join("clip.mkv")).unwrap(), b"fragment bytes");
        assert!(!fragment.exists());
    }

    #[test]
    fn submit_after_shutdown_is_refused() {
        let mut queue = UploadQueue::start(Arc::new(Collecting::default()), 1, false);
        queue.shutdown();
        assert!(!queue.submit(PathBuf::from("late.mp4")));
    }
}
