//! Locating and opening extension libraries.

mod native;

use std::path::{Path, PathBuf};

pub use native::NativeModule;

/// Platform file extension of loadable libraries.
pub fn native_extension() -> &'static str {
    match std::env::consts::OS {
        "macos" => "dylib",
        "windows" => "dll",
        _ => "so",
    }
}

/// Whether `path` looks like a loadable extension library.
pub fn is_native_extension(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "so" | "dylib" | "dll"))
}

/// List extension libraries directly inside `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn discover(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Extension directory does not exist");
        return Ok(Vec::new());
    }

    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_native_extension(path))
        .collect();
    found.sort();

    tracing::debug!(dir = %dir.display(), count = found.len(), "Discovered extension libraries");
    Ok(found)
}
