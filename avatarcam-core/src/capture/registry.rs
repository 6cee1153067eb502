//! Sender discovery
//!
//! [`SourceRegistry`] is a pure query over a [`TextureTransport`]. It holds no
//! connection; the only state is the result of the last enumeration.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::TextureTransport;
use crate::types::{SelectionPolicy, SourceDescriptor};

/// Enumerates advertised senders and picks candidates
pub struct SourceRegistry {
    transport: Arc<dyn TextureTransport>,
    cache: Mutex<Vec<SourceDescriptor>>,
}

impl SourceRegistry {
    pub fn new(transport: Arc<dyn TextureTransport>) -> Self {
        Self {
            transport,
            cache: Mutex::new(Vec::new()),
        }
    }

    /// Transport this registry queries
    pub fn transport(&self) -> Arc<dyn TextureTransport> {
        self.transport.clone()
    }

    /// All advertised senders
    ///
    /// Never fails: a query error yields an empty set and a warning.
    pub fn enumerate(&self) -> Vec<SourceDescriptor> {
        let senders = match self.transport.list_senders() {
            Ok(senders) => senders,
            Err(e) => {
                warn!("{} discovery failed: {}", self.transport.name(), e);
                Vec::new()
            }
        };
        debug!("Found {} sender(s)", senders.len());
        *self.cache.lock() = senders.clone();
        senders
    }

    /// Result of the last enumeration
    pub fn cached(&self) -> Vec<SourceDescriptor> {
        self.cache.lock().clone()
    }

    /// Freshly enumerate and pick the best sender containing `pattern`
    pub fn find_matching(&self, pattern: &str) -> Option<SourceDescriptor> {
        find_matching(&self.enumerate(), pattern).cloned()
    }

    /// Freshly enumerate and apply a selection policy
    pub fn select(&self, policy: &SelectionPolicy) -> Option<SourceDescriptor> {
        select_from(&self.enumerate(), policy).cloned()
    }
}

/// Most recently seen sender whose name contains `pattern`
///
/// Ties are broken by the lexicographically smallest name, so the result does
/// not depend on enumeration order.
pub fn find_matching<'a>(
    candidates: &'a [SourceDescriptor],
    pattern: &str,
) -> Option<&'a SourceDescriptor> {
    best(candidates.iter().filter(|d| d.name.contains(pattern)))
}

/// Apply a selection policy to a set of candidates
pub fn select_from<'a>(
    candidates: &'a [SourceDescriptor],
    policy: &SelectionPolicy,
) -> Option<&'a SourceDescriptor> {
    best(candidates.iter().filter(|d| policy.accepts(&d.name)))
}

fn best<'a>(matches: impl Iterator<Item = &'a SourceDescriptor>) -> Option<&'a SourceDescriptor> {
    matches.min_by(|a, b| {
        b.last_seen_at
            .cmp(&a.last_seen_at)
            .then_with(|| a.name.cmp(&b.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn desc(name: &str, age_ms: u64) -> SourceDescriptor {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        SourceDescriptor::new(name, 1280, 720).with_last_seen(base - Duration::from_millis(age_ms))
    }

    #[test]
    fn test_prefers_most_recent() {
        let set = vec![desc("VRChatCam", 500), desc("VRCStream", 10), desc("OBS", 0)];
        assert_eq!(find_matching(&set, "VRC").unwrap().name, "VRCStream");
    }

    #[test]
    fn test_no_match() {
        let set = vec![desc("OBS", 0)];
        assert!(find_matching(&set, "VRC").is_none());
        assert!(find_matching(&[], "VRC").is_none());
    }

    #[test]
    fn test_pattern_is_case_sensitive() {
        let set = vec![desc("vrcCam", 0), desc("MyVRCCam", 100)];
        assert_eq!(find_matching(&set, "VRC").unwrap().name, "MyVRCCam");
        assert!(find_matching(&set[..1], "VRC").is_none());
    }

    #[test]
    fn test_manual_requires_exact_name() {
        let set = vec![desc("VRChatCam", 0), desc("VRChatCam2", 0)];
        let policy = SelectionPolicy::manual("VRChatCam");
        assert_eq!(select_from(&set, &policy).unwrap().name, "VRChatCam");
    }
}
