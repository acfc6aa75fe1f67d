//! Remote directory listings as shown by a file browser.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub mod_unix: i64,
}

/// Body of a successful `sftp_ls` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

/// Read-only copy of a host's listing for the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingView {
    pub cwd: String,
    pub entries: Vec<Entry>,
    pub selected: Option<String>,
}

/// Listing state for one host.
#[derive(Debug, Default)]
pub struct DirectoryListing {
    cwd: String,
    entries: Vec<Entry>,
    selected: Option<String>,
    requested: u64,
}

impl DirectoryListing {
    /// Start a refresh. Only the reply carrying the returned sequence number
    /// will be applied.
    pub fn begin_refresh(&mut self) -> u64 {
        self.requested += 1;
        self.requested
    }

    /// Replace the listing. Returns false for replies that were superseded.
    pub fn apply(&mut self, seq: u64, listing: Listing) -> bool {
        if seq != self.requested {
            return false;
        }
        self.cwd = listing.cwd;
        self.entries = listing.entries;
        if let Some(selected) = &self.selected {
            if !self.entries.iter().any(|e| &e.path == selected) {
                self.selected = None;
            }
        }
        true
    }

    /// Select an entry by path. Unknown paths clear the selection.
    pub fn select(&mut self, path: Option<&str>) -> bool {
        self.selected = path
            .filter(|p| self.entries.iter().any(|e| e.path == *p))
            .map(str::to_string);
        self.selected.is_some()
    }

    pub fn view(&self) -> ListingView {
        ListingView {
            cwd: self.cwd.clone(),
            entries: self.entries.clone(),
            selected: self.selected.clone(),
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn selected(&self) -> Option<&Entry> {
        let selected = self.selected.as_deref()?;
        self.entries.iter().find(|e| e.path == selected)
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Destination path when `from` is dropped onto `onto`, if `onto` is a
    /// directory in this listing and differs from the source.
    pub fn drop_target(&self, from: &str, onto: &str) -> Option<String> {
        let target = self.entry(onto).filter(|e| e.is_dir)?;
        if target.path == from {
            return None;
        }
        let name = from.trim_end_matches('/').rsplit('/').next()?;
        if name.is_empty() {
            return None;
        }
        Some(join_remote(&target.path, name))
    }
}

/// Join a remote directory and a name with exactly one `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, is_dir: bool) -> Entry {
        Entry {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            is_dir,
            size: 0,
            mode: 0,
            mod_unix: 0,
        }
    }

    fn listing(entries: Vec<Entry>) -> Listing {
        Listing {
            cwd: "/home".into(),
            entries,
        }
    }

    #[test]
    fn refresh_preserves_selection_only_if_present() {
        let mut dl = DirectoryListing::default();
        let seq = dl.begin_refresh();
        dl.apply(seq, listing(vec![entry("/home/a", false), entry("/home/b", false)]));
        assert!(dl.select(Some("/home/b")));

        let seq = dl.begin_refresh();
        dl.apply(seq, listing(vec![entry("/home/b", false)]));
        assert_eq!(dl.selected().map(|e| e.path.as_str()), Some("/home/b"));

        let seq = dl.begin_refresh();
        dl.apply(seq, listing(vec![entry("/home/a", false)]));
        assert!(dl.selected().is_none());
    }

    #[test]
    fn superseded_reply_is_ignored() {
        let mut dl = DirectoryListing::default();
        let old = dl.begin_refresh();
        let new = dl.begin_refresh();
        assert!(dl.apply(new, listing(vec![entry("/home/new", false)])));
        assert!(!dl.apply(old, listing(vec![entry("/home/old", false)])));
        assert_eq!(dl.entries()[0].path, "/home/new");
    }

    #[test]
    fn drop_onto_directory_only() {
        let mut dl = DirectoryListing::default();
        let seq = dl.begin_refresh();
        dl.apply(
            seq,
            listing(vec![entry("/home/docs", true), entry("/home/notes.txt", false)]),
        );
        assert_eq!(
            dl.drop_target("/home/notes.txt", "/home/docs").as_deref(),
            Some("/home/docs/notes.txt")
        );
        assert_eq!(dl.drop_target("/home/docs", "/home/notes.txt"), None);
        assert_eq!(dl.drop_target("/home/docs", "/home/docs"), None);
    }

    #[test]
    fn listing_reply_field_names() {
        let parsed: Listing = serde_json::from_value(serde_json::json!({
            "ok": true,
            "cwd": "/",
            "entries": [{"name": "etc", "path": "/etc", "isDir": true, "size": 4096, "mode": 16877, "modUnix": 1700000000}],
        }))
        .unwrap();
        assert!(parsed.entries[0].is_dir);
        assert_eq!(parsed.entries[0].mod_unix, 1_700_000_000);
    }

    #[test]
    fn join_remote_normalizes_slashes() {
        assert_eq!(join_remote("/a/", "b"), "/a/b");
        assert_eq!(join_remote("/", "b"), "/b");
        assert_eq!(join_remote("", "b"), "b");
    }
}
