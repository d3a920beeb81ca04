//! Durable coordination state: counters, trigger configuration, the overseer lock and the
//! run log. Everything here is a free function over a [`rusqlite::Connection`].

pub mod counters;
pub mod lock;
pub mod runlog;
pub mod trigger;

use std::path::Path;

/// Key under which a project's state is stored.
///
/// Two spellings of the same directory must map to one key, so the path is canonicalized
/// when it exists.
pub fn project_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
