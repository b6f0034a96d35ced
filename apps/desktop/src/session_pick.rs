use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use storyboard::STORYBOARD_KEY;
use uuid::Uuid;

/// Environment variable naming the session to open.
pub const SESSION_ENV: &str = "NEMU_SESSION";

/// Pick the session to open: an explicit argument, then `NEMU_SESSION`,
/// then the most recently written session under `root`.
///
/// An explicit value that is not a uuid is an error rather than a silent
/// fallback to another session.
pub fn resolve_session(
    arg: Option<&str>,
    env: Option<String>,
    root: &Path,
) -> io::Result<Option<Uuid>> {
    let explicit = arg
        .map(str::to_string)
        .or(env)
        .filter(|s| !s.trim().is_empty());
    if let Some(raw) = explicit {
        return Uuid::parse_str(raw.trim()).map(Some).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{raw:?} is not a session id: {e}"),
            )
        });
    }
    latest_session(root)
}

/// Newest session directory that holds a storyboard payload.
pub fn latest_session(root: &Path) -> io::Result<Option<Uuid>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let payload_file = format!("{STORYBOARD_KEY}.json");
    let mut newest: Option<(SystemTime, Uuid)> = None;
    for entry in entries {
        let entry = entry?;
        let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| Uuid::parse_str(name).ok())
        else {
            continue;
        };
        let Ok(meta) = fs::metadata(entry.path().join(&payload_file)) else {
            continue;
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.map_or(true, |(t, _)| modified > t) {
            newest = Some((modified, id));
        }
    }
    Ok(newest.map(|(_, id)| id))
}
