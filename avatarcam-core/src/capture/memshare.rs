//! File-backed shared frame transport
//!
//! Each sender owns one `<name>.frame` file in a per-user runtime directory.
//! The file is a 40-byte little-endian header followed by one tightly packed
//! frame:
//!
//! ```text
//! 0   magic "AVCF"
//! 4   version       u16 (1)
//! 6   pixel format  u16 (see PixelFormat::wire_code)
//! 8   width         u32
//! 12  height        u32
//! 16  frame number  u64, increases with every publish
//! 24  timestamp     u64, nanoseconds since the Unix epoch
//! 32  flags         u16, bit 0 = sender closed
//! 34  reserved      6 bytes
//! 40  payload
//! ```
//!
//! Senders write to a temporary file and rename it over the frame file, so a
//! reader that opened the file always sees one complete frame.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace, warn};

use super::{TextureConnection, TextureTransport};
use crate::config::TransportConfig;
use crate::error::{ConnectError, DiscoveryError, ReceiveError};
use crate::formats::PixelFormat;
use crate::types::{now_ns, Frame, FrameFormat, SourceDescriptor};

/// Frame file magic
pub const MAGIC: [u8; 4] = *b"AVCF";

/// Header format version
pub const VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_LEN: usize = 40;

/// Frame file extension
pub const FRAME_EXT: &str = "frame";

const FLAG_CLOSED: u16 = 1;

/// Receiver poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Per-user runtime directory for AvatarCam
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp
pub fn runtime_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("avatarcam")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/avatarcam-{}", uid))
    }
}

/// Default directory that holds sender frame files
pub fn default_sender_dir() -> PathBuf {
    runtime_dir().join("senders")
}

/// Check that a sender name can be used as a file name
pub fn validate_name(name: &str) -> io::Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.contains(['/', '\0'])
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid sender name '{}'", name),
        ));
    }
    Ok(())
}

/// Path of the frame file for `name` in `dir`
pub fn frame_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, FRAME_EXT))
}

/// Decoded frame file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub format: FrameFormat,
    pub frame_number: u64,
    pub timestamp_ns: u64,
    pub closed: bool,
}

impl FrameHeader {
    /// Encode to the on-disk layout
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&self.format.pixel_format.wire_code().to_le_bytes());
        buf[8..12].copy_from_slice(&self.format.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.format.height.to_le_bytes());
        buf[16..24].copy_from_slice(&self.frame_number.to_le_bytes());
        buf[24..32].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        let flags = if self.closed { FLAG_CLOSED } else { 0 };
        buf[32..34].copy_from_slice(&flags.to_le_bytes());
        buf
    }

    /// Decode from the on-disk layout
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, String> {
        if buf[0..4] != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != VERSION {
            return Err(format!("unsupported version {}", version));
        }
        let code = u16::from_le_bytes([buf[6], buf[7]]);
        let pixel_format = PixelFormat::from_wire_code(code)
            .ok_or_else(|| format!("unknown pixel format code {}", code))?;
        let width = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let height = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[16..24]);
        let frame_number = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[24..32]);
        let timestamp_ns = u64::from_le_bytes(word);
        let flags = u16::from_le_bytes([buf[32], buf[33]]);

        Ok(Self {
            format: FrameFormat::new(width, height, pixel_format),
            frame_number,
            timestamp_ns,
            closed: flags & FLAG_CLOSED != 0,
        })
    }
}

fn read_header(file: &mut File) -> io::Result<Result<FrameHeader, String>> {
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf)?;
    Ok(FrameHeader::decode(&buf))
}

/// Payload length the header promises, checked against the file on disk
///
/// Header fields come from another process, so nothing is allocated until
/// the file is known to hold exactly that many bytes.
fn payload_len(header: &FrameHeader, file: &File) -> Result<usize, String> {
    let expected = header
        .format
        .buffer_size()
        .ok_or_else(|| format!("{} does not fit in memory", header.format))?;
    let on_disk = file
        .metadata()
        .map_err(|e| e.to_string())?
        .len()
        .saturating_sub(HEADER_LEN as u64);
    if on_disk != expected as u64 {
        return Err(format!(
            "header says {} ({} bytes) but file holds {} bytes",
            header.format, expected, on_disk
        ));
    }
    Ok(expected)
}

/// Memshare transport reading sender files from one directory
#[derive(Debug, Clone)]
pub struct MemShareTransport {
    dir: PathBuf,
    stale_after: Duration,
}

impl MemShareTransport {
    /// Create a transport over `dir`
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    /// Create a transport from configuration
    pub fn from_config(config: &TransportConfig) -> Self {
        let dir = config.directory.clone().unwrap_or_else(default_sender_dir);
        Self::new(dir, config.stale_after)
    }

    /// Sender directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn describe(&self, path: &Path, name: &str) -> Result<SourceDescriptor, DiscoveryError> {
        let mut file = File::open(path).map_err(|e| DiscoveryError::QueryFailed(e.to_string()))?;
        let header = read_header(&mut file)
            .map_err(|e| DiscoveryError::QueryFailed(format!("{}: {}", name, e)))?
            .map_err(|e| DiscoveryError::QueryFailed(format!("{}: {}", name, e)))?;
        let modified = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| DiscoveryError::QueryFailed(e.to_string()))?;

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if header.closed || age > self.stale_after {
            return Err(DiscoveryError::Stale(name.to_string()));
        }
        payload_len(&header, &file)
            .map_err(|e| DiscoveryError::QueryFailed(format!("{}: {}", name, e)))?;

        Ok(SourceDescriptor {
            name: name.to_string(),
            width: header.format.width,
            height: header.format.height,
            last_seen_at: modified,
        })
    }
}

impl TextureTransport for MemShareTransport {
    fn name(&self) -> &'static str {
        "memshare"
    }

    fn list_senders(&self) -> Result<Vec<SourceDescriptor>, DiscoveryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DiscoveryError::QueryFailed(format!(
                    "{}: {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut senders = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FRAME_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            match self.describe(&path, name) {
                Ok(descriptor) => senders.push(descriptor),
                Err(e) => debug!("Skipping sender: {}", e),
            }
        }

        Ok(senders)
    }

    fn connect(&self, name: &str) -> Result<Box<dyn TextureConnection>, ConnectError> {
        if validate_name(name).is_err() {
            return Err(ConnectError::SourceNotFound(name.to_string()));
        }

        let path = frame_path(&self.dir, name);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConnectError::SourceNotFound(name.to_string()));
            }
            Err(e) => return Err(ConnectError::ConnectionRefused(format!("{}: {}", name, e))),
        };

        match read_header(&mut file) {
            Ok(Ok(header)) if header.closed => Err(ConnectError::SourceNotFound(name.to_string())),
            Ok(Ok(header)) => {
                payload_len(&header, &file)
                    .map_err(|e| ConnectError::ConnectionRefused(format!("{}: {}", name, e)))?;
                debug!("Connected to memshare sender '{}' ({})", name, header.format);
                Ok(Box::new(MemShareConnection {
                    name: name.to_string(),
                    path,
                    last_frame: None,
                }))
            }
            Ok(Err(e)) => Err(ConnectError::ConnectionRefused(format!("{}: {}", name, e))),
            Err(e) => Err(ConnectError::ConnectionRefused(format!("{}: {}", name, e))),
        }
    }
}

/// Polling connection to one sender file
struct MemShareConnection {
    name: String,
    path: PathBuf,
    last_frame: Option<u64>,
}

impl MemShareConnection {
    /// Read the current frame if it is newer than the last one returned
    fn try_read(&mut self) -> Result<Option<Frame>, ReceiveError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReceiveError::SourceClosed),
            Err(e) => return Err(ReceiveError::Transport(e.to_string())),
        };

        let header = match read_header(&mut file) {
            Ok(Ok(header)) => header,
            Ok(Err(e)) => return Err(ReceiveError::Transport(e)),
            // Truncated file while the sender is recreating it
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ReceiveError::Transport(e.to_string())),
        };

        if header.closed {
            return Err(ReceiveError::SourceClosed);
        }
        if self.last_frame == Some(header.frame_number) {
            return Ok(None);
        }

        let len = payload_len(&header, &file).map_err(ReceiveError::Transport)?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)
            .map_err(|e| ReceiveError::Transport(format!("short frame: {}", e)))?;

        self.last_frame = Some(header.frame_number);
        trace!(
            "memshare '{}' frame #{} {}",
            self.name, header.frame_number, header.format
        );
        Frame::new(header.format, data, header.timestamp_ns)
            .map(Some)
            .map_err(|e| ReceiveError::Transport(e.to_string()))
    }
}

impl TextureConnection for MemShareConnection {
    fn pull(&mut self, timeout: Duration) -> Result<Frame, ReceiveError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.try_read()? {
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ReceiveError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn close(&mut self) {
        self.last_frame = None;
    }
}

/// Publishes frames as a memshare sender
pub struct MemShareSender {
    name: String,
    path: PathBuf,
    tmp_path: PathBuf,
    frame_number: u64,
    last_format: Option<FrameFormat>,
    closed: bool,
}

impl MemShareSender {
    /// Register a sender called `name` in `dir`
    pub fn new(dir: impl AsRef<Path>, name: &str) -> io::Result<Self> {
        validate_name(name)?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        Ok(Self {
            name: name.to_string(),
            path: frame_path(dir, name),
            tmp_path: dir.join(format!(".{}.{}.tmp", name, FRAME_EXT)),
            frame_number: 0,
            last_format: None,
            closed: false,
        })
    }

    /// Sender name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of frames published so far
    pub fn frames_published(&self) -> u64 {
        self.frame_number
    }

    /// Publish one frame
    pub fn publish(&mut self, frame: &Frame) -> io::Result<()> {
        self.frame_number += 1;
        self.closed = false;
        let header = FrameHeader {
            format: frame.format(),
            frame_number: self.frame_number,
            timestamp_ns: if frame.pts > 0 { frame.pts } else { now_ns() },
            closed: false,
        };
        if self.last_format != Some(header.format) {
            debug!("Sender '{}' publishing {}", self.name, header.format);
            self.last_format = Some(header.format);
        }
        self.write_atomic(&header, frame.data())
    }

    /// Mark the sender closed; connected receivers see `SourceClosed`
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let header = FrameHeader {
            format: self
                .last_format
                .unwrap_or_else(|| FrameFormat::new(0, 0, PixelFormat::Bgra8)),
            frame_number: self.frame_number,
            timestamp_ns: now_ns(),
            closed: true,
        };
        self.write_atomic(&header, &[])
    }

    fn write_atomic(&self, header: &FrameHeader, payload: &[u8]) -> io::Result<()> {
        let mut file = File::create(&self.tmp_path)?;
        file.write_all(&header.encode())?;
        file.write_all(payload)?;
        drop(file);
        std::fs::rename(&self.tmp_path, &self.path)
    }
}

impl Drop for MemShareSender {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove sender file {:?}: {}", self.path, e);
            }
        }
        let _ = std::fs::remove_file(&self.tmp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = FrameHeader {
            format: FrameFormat::new(1280, 720, PixelFormat::Bgra8),
            frame_number: 42,
            timestamp_ns: 123_456_789,
            closed: false,
        };
        assert_eq!(FrameHeader::decode(&header.encode()), Ok(header));
    }

    #[test]
    fn test_header_rejects_garbage() {
        let mut buf = [0u8; HEADER_LEN];
        assert!(FrameHeader::decode(&buf).is_err());
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert!(FrameHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("VRChatCam").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(".hidden").is_err());
    }
}
