//! Integration tests for sender discovery and selection

mod mocks;

use avatarcam_core::capture::{find_matching, select_from, SourceRegistry};
use avatarcam_core::types::{SelectionPolicy, SourceDescriptor};
use mocks::MockTransport;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn senders() -> Vec<SourceDescriptor> {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    vec![
        SourceDescriptor::new("OBS Output", 1920, 1080).with_last_seen(base),
        SourceDescriptor::new("VRChatCam", 1280, 720).with_last_seen(base + Duration::from_secs(2)),
        SourceDescriptor::new("VRCStream", 1920, 1080).with_last_seen(base + Duration::from_secs(2)),
        SourceDescriptor::new("VRChatOld", 640, 480).with_last_seen(base + Duration::from_secs(1)),
    ]
}

#[test]
fn test_find_matching_is_order_independent() {
    let mut list = senders();
    let expected = find_matching(&list, "VRC").map(|s| s.name.clone());
    assert_eq!(expected.as_deref(), Some("VRCStream"));

    for rotation in 0..list.len() {
        list.rotate_left(1);
        let found = find_matching(&list, "VRC").map(|s| s.name.clone());
        assert_eq!(found, expected, "rotation {}", rotation);
    }
    list.reverse();
    assert_eq!(find_matching(&list, "VRC").map(|s| s.name.clone()), expected);
}

#[test]
fn test_find_matching_none() {
    assert!(find_matching(&senders(), "Spout").is_none());
    assert!(find_matching(&[], "VRC").is_none());
}

#[test]
fn test_manual_selection_is_exact() {
    let list = senders();
    let policy = SelectionPolicy::manual("VRChatCam");
    assert_eq!(select_from(&list, &policy).map(|s| s.width), Some(1280));
    assert!(select_from(&list, &SelectionPolicy::manual("VRChat")).is_none());
}

#[test]
fn test_registry_caches_enumeration() {
    let transport = MockTransport::new();
    transport.add_sender("VRChatCam", 1280, 720);
    let registry = SourceRegistry::new(Arc::new(transport.clone()));

    assert!(registry.cached().is_empty());
    assert_eq!(registry.enumerate().len(), 1);
    assert_eq!(registry.cached().len(), 1);

    let found = registry.select(&SelectionPolicy::auto("VRC")).expect("match");
    assert_eq!(found.name, "VRChatCam");
}

#[test]
fn test_registry_discovery_failure_is_empty() {
    let transport = MockTransport::new();
    transport.add_sender("VRChatCam", 1280, 720);
    transport.set_fail_discovery(true);
    let registry = SourceRegistry::new(Arc::new(transport));
    assert!(registry.enumerate().is_empty());
    assert!(registry.find_matching("VRC").is_none());
}
