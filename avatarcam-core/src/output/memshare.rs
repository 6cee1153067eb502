//! Memshare virtual camera
//!
//! Republishes output frames as a memshare sender named after the camera.
//! Ownership is an exclusive `flock` on `<name>.lock`, held for the lifetime
//! of the device. The kernel drops it when the owner exits, so a lock file
//! left behind by a dead process is simply reused. The file also records the
//! owner's pid for diagnostics.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{CameraBackend, CameraDevice};
use crate::capture::memshare::{runtime_dir, validate_name};
use crate::capture::MemShareSender;
use crate::error::SinkError;
use crate::types::{Frame, SinkConfig};

/// Default directory for memshare camera output
pub fn default_camera_dir() -> PathBuf {
    runtime_dir().join("cameras")
}

/// Camera backend publishing into a memshare directory
#[derive(Debug, Clone)]
pub struct MemShareCameraBackend {
    dir: PathBuf,
}

impl MemShareCameraBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }
}

impl CameraBackend for MemShareCameraBackend {
    fn name(&self) -> &'static str {
        "memshare"
    }

    fn open(&self, config: &SinkConfig) -> Result<Box<dyn CameraDevice>, SinkError> {
        validate_name(&config.name).map_err(|e| SinkError::DeviceNotInstalled(e.to_string()))?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            SinkError::DeviceNotInstalled(format!("{}: {}", self.dir.display(), e))
        })?;

        let lock = acquire_lock(&self.lock_path(&config.name))?;
        let sender = MemShareSender::new(&self.dir, &config.name)
            .map_err(|e| SinkError::WriteFailed(e.to_string()))?;

        info!("Memshare camera '{}' publishing to {:?}", config.name, self.dir);
        Ok(Box::new(MemShareCamera {
            sender: Some(sender),
            lock: Some(lock),
        }))
    }
}

/// Exclusive lock on a camera name, released when dropped
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
    file: File,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Clear the pid while still holding the lock; closing the fd unlocks
        if let Err(e) = self.file.set_len(0) {
            warn!("Failed to clear lock {:?}: {}", self.path, e);
        }
    }
}

fn acquire_lock(path: &Path) -> Result<LockFile, SinkError> {
    let io_error = |e: io::Error| SinkError::WriteFailed(format!("{}: {}", path.display(), e));

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_error)?;

    // SAFETY: the fd is owned by `file` and stays open for the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            let mut owner = String::new();
            let _ = file.read_to_string(&mut owner);
            let owner = owner.trim();
            let holder = if owner.is_empty() {
                path.display().to_string()
            } else {
                format!("held by pid {}", owner)
            };
            return Err(SinkError::DeviceBusy(holder));
        }
        return Err(io_error(err));
    }

    let mut previous = String::new();
    if file.read_to_string(&mut previous).is_ok() && !previous.trim().is_empty() {
        debug!("Taking over camera lock {:?} from pid {}", path, previous.trim());
    }
    file.set_len(0).map_err(io_error)?;
    file.seek(SeekFrom::Start(0)).map_err(io_error)?;
    writeln!(file, "{}", std::process::id()).map_err(io_error)?;
    file.flush().map_err(io_error)?;

    Ok(LockFile {
        path: path.to_path_buf(),
        file,
    })
}

struct MemShareCamera {
    sender: Option<MemShareSender>,
    lock: Option<LockFile>,
}

impl CameraDevice for MemShareCamera {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let sender = self.sender.as_mut().ok_or(SinkError::NotOpen)?;
        sender
            .publish(frame)
            .map_err(|e| SinkError::WriteFailed(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(mut sender) = self.sender.take() {
            if let Err(e) = sender.close() {
                debug!("Failed to mark camera '{}' closed: {}", sender.name(), e);
            }
        }
        self.lock = None;
    }
}

impl Drop for MemShareCamera {
    fn drop(&mut self) {
        self.close();
    }
}
