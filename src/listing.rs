use std::path::{Path, PathBuf};

use homedir::my_home;

/// Expand a leading `~` to the current user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };

    match my_home() {
        Ok(Some(home)) if rest.is_empty() => home,
        Ok(Some(home)) => home.join(rest),
        _ => {
            log::warn!("could not determine home directory, using {path} as is");
            PathBuf::from(path)
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('$')
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Image files directly inside `dir`, sorted by file name.
///
/// Not recursive. Hidden names and files with other extensions are skipped.
pub fn list_images(dir: &Path, extensions: &[String]) -> std::io::Result<Vec<String>> {
    let mut names: Vec<(String, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let name = entry.file_name().to_str()?.to_string();
            if is_hidden(&name) || !has_extension(&name, extensions) || !path.is_file() {
                return None;
            }
            Some((name, path))
        })
        .collect();

    names.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(names
        .into_iter()
        .map(|(_, path)| path.to_string_lossy().into_owned())
        .collect())
}
