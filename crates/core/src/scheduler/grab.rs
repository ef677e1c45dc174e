use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};

use crate::{render::Surface, Result};

/// Frames that may wait for the writer before further grabs are dropped.
pub const GRAB_QUEUE_LEN: usize = 4;

/// Background PNG writer for screengrabs. The frame loop hands over a copy
/// of the surface and never touches the disk itself.
#[derive(Debug)]
pub struct GrabWriter {
    dir: PathBuf,
    tx: Option<Sender<(u64, Surface)>>,
    thread: Option<JoinHandle<()>>,
}

impl GrabWriter {
    /// The thread is started by the first grab.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            tx: None,
            thread: None,
        }
    }

    /// Queues `surface` for writing. Returns false, dropping the frame, when
    /// the writer is behind or could not be started.
    pub fn submit(&mut self, frame: u64, surface: Surface) -> bool {
        if self.tx.is_none() {
            if let Err(err) = self.start() {
                tracing::warn!(%err, "screengrab writer unavailable");
                return false;
            }
        }
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        match tx.try_send((frame, surface)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(frame, "screengrab writer busy, dropping grab");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(frame, "screengrab writer stopped");
                self.tx = None;
                false
            }
        }
    }

    /// Waits for queued grabs to be written, then stops the thread. The
    /// next grab starts a fresh one.
    pub fn finish(&mut self) {
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("screengrab writer panicked");
            }
        }
    }

    fn start(&mut self) -> std::io::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded::<(u64, Surface)>(GRAB_QUEUE_LEN);
        let dir = self.dir.clone();
        let thread = thread::Builder::new()
            .name("screengrab".to_string())
            .spawn(move || {
                for (frame, surface) in rx {
                    match write_grab(&dir, frame, &surface) {
                        Ok(path) => tracing::info!(?path, "saved screengrab"),
                        Err(err) => tracing::warn!(%err, frame, "screengrab failed"),
                    }
                }
            })?;
        self.tx = Some(tx);
        self.thread = Some(thread);
        Ok(())
    }
}

impl Drop for GrabWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Writes `surface` as a PNG into `dir`, named after the frame.
pub fn write_grab(dir: &Path, frame: u64, surface: &Surface) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = next_grab_path(dir, frame);
    surface.save_png(&path)?;
    Ok(path)
}

fn next_grab_path(dir: &Path, frame: u64) -> PathBuf {
    let mut path = dir.join(format!("grab-{frame:08}.png"));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("grab-{frame:08}-{suffix}.png"));
        suffix += 1;
    }
    path
}
