//! `notify`-backed native source for platforms without FSEvents.
//!
//! Events are translated into FSEvents-style flag bits so consumers decode
//! them the same way everywhere.

use std::path::Path;

use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;
use crate::flags::EventFlags;
use crate::native::{NativeWatcher, RawEventCallback};

/// [`NativeWatcher`] backed by the platform's recommended `notify` watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifySource;

impl NotifySource {
    pub fn new() -> Self {
        Self
    }
}

impl NativeWatcher for NotifySource {
    type Handle = RecommendedWatcher;

    fn start(&self, path: &str, callback: RawEventCallback) -> Option<RecommendedWatcher> {
        let root = path.to_string();
        let created = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => deliver(&root, &callback, event),
            Err(error) => tracing::warn!("filesystem watcher error under {}: {}", root, error),
        });
        let mut watcher = match created {
            Ok(watcher) => watcher,
            Err(error) => {
                tracing::warn!("failed to create filesystem watcher for {}: {}", path, error);
                return None;
            }
        };

        let target = Path::new(path);
        let mode = if target.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        if let Err(error) = watcher.watch(target, mode) {
            tracing::warn!("failed to watch {}: {}", path, error);
            return None;
        }
        Some(watcher)
    }

    fn stop(&self, handle: RecommendedWatcher) -> Result<()> {
        drop(handle);
        Ok(())
    }
}

fn deliver(root: &str, callback: &RawEventCallback, event: Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    if event.need_rescan() || event.paths.is_empty() {
        callback(root, EventFlags::MUST_SCAN_SUBDIRS.bits());
        return;
    }

    let flags = event_flags(&event.kind).bits();
    for path in &event.paths {
        callback(&*path.to_string_lossy(), flags);
    }
}

/// Maps a `notify` event kind onto FSEvents flag bits.
pub fn event_flags(kind: &EventKind) -> EventFlags {
    match kind {
        EventKind::Create(kind) => EventFlags::ITEM_CREATED | create_item_type(kind),
        EventKind::Remove(kind) => EventFlags::ITEM_REMOVED | remove_item_type(kind),
        EventKind::Modify(ModifyKind::Name(_)) => EventFlags::ITEM_RENAMED,
        EventKind::Modify(ModifyKind::Metadata(kind)) => metadata_flags(kind),
        EventKind::Modify(_) => EventFlags::ITEM_MODIFIED,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => EventFlags::empty(),
    }
}

fn create_item_type(kind: &CreateKind) -> EventFlags {
    match kind {
        CreateKind::File => EventFlags::ITEM_IS_FILE,
        CreateKind::Folder => EventFlags::ITEM_IS_DIR,
        _ => EventFlags::empty(),
    }
}

fn remove_item_type(kind: &RemoveKind) -> EventFlags {
    match kind {
        RemoveKind::File => EventFlags::ITEM_IS_FILE,
        RemoveKind::Folder => EventFlags::ITEM_IS_DIR,
        _ => EventFlags::empty(),
    }
}

fn metadata_flags(kind: &MetadataKind) -> EventFlags {
    match kind {
        MetadataKind::Ownership => EventFlags::ITEM_CHANGE_OWNER,
        MetadataKind::Extended => EventFlags::ITEM_XATTR_MOD,
        _ => EventFlags::ITEM_INODE_META_MOD,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use notify::event::{AccessKind, DataChange, Flag, RenameMode};
    use parking_lot::Mutex;

    use super::*;
    use crate::flags::{event_info, EventKind as Kind, ItemType};

    type Delivered = Arc<Mutex<Vec<(String, u32)>>>;

    fn collector() -> (Delivered, RawEventCallback) {
        let delivered: Delivered = Arc::default();
        let sink = Arc::clone(&delivered);
        let callback: RawEventCallback = Arc::new(move |path: &str, flags: u32| {
            sink.lock().push((path.to_string(), flags))
        });
        (delivered, callback)
    }

    #[test]
    fn access_events_are_dropped() {
        let (delivered, callback) = collector();
        let event =
            Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/root/a"));
        deliver("/root", &callback, event);
        assert!(delivered.lock().is_empty());
    }

    #[test]
    fn rescan_and_pathless_events_rescan_the_root() {
        let (delivered, callback) = collector();
        let rescan = Event::new(EventKind::Other)
            .add_path(PathBuf::from("/root/a"))
            .set_flag(Flag::Rescan);
        deliver("/root", &callback, rescan);
        deliver("/root", &callback, Event::new(EventKind::Create(CreateKind::Any)));

        let scan = EventFlags::MUST_SCAN_SUBDIRS.bits();
        assert_eq!(
            *delivered.lock(),
            vec![("/root".to_string(), scan), ("/root".to_string(), scan)]
        );
    }

    #[test]
    fn every_path_of_an_event_is_delivered() {
        let (delivered, callback) = collector();
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/root/old"))
            .add_path(PathBuf::from("/root/new"));
        deliver("/root", &callback, event);

        let renamed = EventFlags::ITEM_RENAMED.bits();
        assert_eq!(
            *delivered.lock(),
            vec![
                ("/root/old".to_string(), renamed),
                ("/root/new".to_string(), renamed)
            ]
        );
    }

    #[test]
    fn create_and_remove_carry_item_type() {
        let created = event_flags(&EventKind::Create(CreateKind::Folder));
        assert_eq!(created, EventFlags::ITEM_CREATED | EventFlags::ITEM_IS_DIR);

        let removed = event_info("/p/a", event_flags(&EventKind::Remove(RemoveKind::File)).bits());
        assert_eq!(removed.event, Kind::Deleted);
        assert_eq!(removed.item, Some(ItemType::File));
    }

    #[test]
    fn renames_and_content_changes() {
        assert_eq!(
            event_flags(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            EventFlags::ITEM_RENAMED
        );
        assert_eq!(
            event_flags(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            EventFlags::ITEM_MODIFIED
        );
    }

    #[test]
    fn metadata_changes_map_to_change_bits() {
        let ownership = event_info(
            "/p/a",
            event_flags(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Ownership))).bits(),
        );
        assert!(ownership.changes.access);

        let xattrs = event_flags(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Extended)));
        assert_eq!(xattrs, EventFlags::ITEM_XATTR_MOD);

        let times = event_flags(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)));
        assert_eq!(times, EventFlags::ITEM_INODE_META_MOD);
    }

    #[test]
    fn missing_path_cannot_be_watched() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let started = NotifySource::new().start(
            missing.to_str().unwrap(),
            Arc::new(|_: &str, _: u32| {}),
        );
        assert!(started.is_none());
    }

    #[test]
    fn existing_directory_can_be_watched_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let source = NotifySource::new();
        let handle = source
            .start(dir.path().to_str().unwrap(), Arc::new(|_: &str, _: u32| {}))
            .unwrap();
        source.stop(handle).unwrap();
    }
}
