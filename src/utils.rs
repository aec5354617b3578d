use std::path::Path;
use std::str::Utf8Error;
use tokio::fs;
use tracing::{debug, instrument};

/// Shorten `s` to at most `max` bytes for log output, on a char boundary.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Split JSON Lines bytes on `\n` and decode each line on its own.
///
/// Line numbers are 1-based. A line with invalid UTF-8 only spoils itself.
pub fn numbered_lines(bytes: &[u8]) -> impl Iterator<Item = (usize, Result<&str, Utf8Error>)> {
    bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(idx, line)| (idx + 1, std::str::from_utf8(line)))
}

/// Create the directory that will hold `path`, if it has one.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).await?;
            debug!(dir = %parent.display(), "Output directory ready");
            Ok(())
        }
        _ => Ok(()),
    }
}
