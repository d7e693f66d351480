//! Event flag decoding.
//!
//! Raw events carry an FSEvents-style bitmask. Every native source in this
//! crate reports flags in that encoding, so consumers can classify events
//! the same way on every platform.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        const MUST_SCAN_SUBDIRS   = 0x0000_0001;
        const USER_DROPPED        = 0x0000_0002;
        const KERNEL_DROPPED      = 0x0000_0004;
        const EVENT_IDS_WRAPPED   = 0x0000_0008;
        const HISTORY_DONE        = 0x0000_0010;
        const ROOT_CHANGED        = 0x0000_0020;
        const MOUNT               = 0x0000_0040;
        const UNMOUNT             = 0x0000_0080;
        const ITEM_CREATED        = 0x0000_0100;
        const ITEM_REMOVED        = 0x0000_0200;
        const ITEM_INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED        = 0x0000_0800;
        const ITEM_MODIFIED       = 0x0000_1000;
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER   = 0x0000_4000;
        const ITEM_XATTR_MOD      = 0x0000_8000;
        const ITEM_IS_FILE        = 0x0001_0000;
        const ITEM_IS_DIR         = 0x0002_0000;
        const ITEM_IS_SYMLINK     = 0x0004_0000;
        const OWN_EVENT           = 0x0008_0000;
        const ITEM_IS_HARDLINK    = 0x0010_0000;
        const ITEM_IS_LAST_HARDLINK = 0x0020_0000;
        const ITEM_CLONED         = 0x0040_0000;
    }
}

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Deleted,
    Moved,
    Created,
    Modified,
    RootChanged,
    Cloned,
    Unknown,
}

impl EventKind {
    /// Classifies `flags`. Earlier variants take precedence.
    pub fn classify(flags: EventFlags) -> Self {
        if flags.contains(EventFlags::ITEM_REMOVED) {
            return Self::Deleted;
        }
        if flags.contains(EventFlags::ITEM_RENAMED) {
            return Self::Moved;
        }
        if flags.contains(EventFlags::ITEM_CREATED) {
            return Self::Created;
        }
        if flags.contains(EventFlags::ITEM_MODIFIED) {
            return Self::Modified;
        }
        if flags.contains(EventFlags::ROOT_CHANGED) {
            return Self::RootChanged;
        }
        if flags.contains(EventFlags::ITEM_CLONED) {
            return Self::Cloned;
        }
        Self::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Moved => "moved",
            Self::Created => "created",
            Self::Modified => "modified",
            Self::RootChanged => "root-changed",
            Self::Cloned => "cloned",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Directory,
    Symlink,
}

impl ItemType {
    pub fn classify(flags: EventFlags) -> Option<Self> {
        if flags.contains(EventFlags::ITEM_IS_FILE) {
            Some(Self::File)
        } else if flags.contains(EventFlags::ITEM_IS_DIR) {
            Some(Self::Directory)
        } else if flags.contains(EventFlags::ITEM_IS_SYMLINK) {
            Some(Self::Symlink)
        } else {
            None
        }
    }
}

/// Metadata-level changes reported alongside the main event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ItemChanges {
    pub inode: bool,
    pub finder: bool,
    pub access: bool,
    pub xattrs: bool,
}

impl From<EventFlags> for ItemChanges {
    fn from(flags: EventFlags) -> Self {
        Self {
            inode: flags.contains(EventFlags::ITEM_INODE_META_MOD),
            finder: flags.contains(EventFlags::ITEM_FINDER_INFO_MOD),
            access: flags.contains(EventFlags::ITEM_CHANGE_OWNER),
            xattrs: flags.contains(EventFlags::ITEM_XATTR_MOD),
        }
    }
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventInfo {
    pub path: String,
    pub flags: u32,
    pub event: EventKind,
    #[serde(rename = "type")]
    pub item: Option<ItemType>,
    pub changes: ItemChanges,
}

/// Decodes a raw `(path, flags)` pair. Unknown bits are ignored.
pub fn event_info(path: impl Into<String>, flags: u32) -> EventInfo {
    let decoded = EventFlags::from_bits_truncate(flags);
    EventInfo {
        path: path.into(),
        flags,
        event: EventKind::classify(decoded),
        item: ItemType::classify(decoded),
        changes: ItemChanges::from(decoded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_wins_over_other_kinds() {
        let flags = EventFlags::ITEM_CREATED | EventFlags::ITEM_REMOVED | EventFlags::ITEM_MODIFIED;
        assert_eq!(EventKind::classify(flags), EventKind::Deleted);
    }

    #[test]
    fn rename_wins_over_create() {
        let flags = EventFlags::ITEM_CREATED | EventFlags::ITEM_RENAMED;
        assert_eq!(EventKind::classify(flags), EventKind::Moved);
    }

    #[test]
    fn metadata_only_changes_are_unknown() {
        let info = event_info("/p/a", EventFlags::ITEM_XATTR_MOD.bits());
        assert_eq!(info.event, EventKind::Unknown);
        assert!(info.changes.xattrs);
        assert!(!info.changes.inode);
    }

    #[test]
    fn decodes_item_type_and_changes() {
        let flags = EventFlags::ITEM_MODIFIED
            | EventFlags::ITEM_IS_FILE
            | EventFlags::ITEM_INODE_META_MOD
            | EventFlags::ITEM_CHANGE_OWNER;
        let info = event_info("/p/file.txt", flags.bits());
        assert_eq!(info.event, EventKind::Modified);
        assert_eq!(info.item, Some(ItemType::File));
        assert_eq!(
            info.changes,
            ItemChanges {
                inode: true,
                finder: false,
                access: true,
                xattrs: false,
            }
        );
    }

    #[test]
    fn root_changed_serializes_kebab_case() {
        let info = event_info("/p", EventFlags::ROOT_CHANGED.bits());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["event"], "root-changed");
        assert_eq!(json["type"], serde_json::Value::Null);
    }

    #[test]
    fn unknown_bits_are_ignored() {
        let info = event_info("/p", 0x8000_0000 | EventFlags::ITEM_IS_DIR.bits());
        assert_eq!(info.item, Some(ItemType::Directory));
        assert_eq!(info.event, EventKind::Unknown);
        assert_eq!(info.flags, 0x8000_0000 | 0x0002_0000);
    }
}
