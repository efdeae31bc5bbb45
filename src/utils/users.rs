//! User and group name resolution from the local account databases.

use std::collections::HashMap;
use std::fs;

/// Lookup table for uid/gid to name, loaded once per capture.
#[derive(Debug, Default)]
pub struct NameCache {
    users: HashMap<u32, String>,
    groups: HashMap<u32, String>,
}

impl NameCache {
    /// Load `/etc/passwd` and `/etc/group`. Unreadable files leave the table empty.
    pub fn load() -> Self {
        Self {
            users: parse_id_file(&fs::read_to_string("/etc/passwd").unwrap_or_default()),
            groups: parse_id_file(&fs::read_to_string("/etc/group").unwrap_or_default()),
        }
    }

    /// User name for `uid`, or the numeric uid.
    pub fn user(&self, uid: u32) -> String {
        self.users.get(&uid).cloned().unwrap_or_else(|| uid.to_string())
    }

    /// Group name for `gid`, or the numeric gid.
    pub fn group(&self, gid: u32) -> String {
        self.groups.get(&gid).cloned().unwrap_or_else(|| gid.to_string())
    }
}

/// Parse `name:x:id:...` lines.
fn parse_id_file(content: &str) -> HashMap<u32, String> {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() >= 3 {
                fields[2].parse::<u32>().ok().map(|id| (id, fields[0].to_string()))
            } else {
                None
            }
        })
        .collect()
}
