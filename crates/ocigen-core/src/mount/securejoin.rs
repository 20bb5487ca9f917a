//! Symlink resolution confined to a root directory.
//!
//! Every component is resolved as if `root` were `/`: absolute link
//! targets restart at `root`, and `..` never climbs above it. Components
//! that do not exist yet are joined lexically.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Upper bound on symlinks followed for one path.
pub const MAX_SYMLINK_HOPS: usize = 255;

enum Part {
    Parent,
    Name(OsString),
}

fn parts(path: &Path) -> impl Iterator<Item = Part> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(Part::Name(name.to_os_string())),
        Component::ParentDir => Some(Part::Parent),
        Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
    })
}

/// Resolves `unsafe_path` inside `root` and returns the resolved path
/// relative to `root`, as a list of components.
fn resolve_components(root: &Path, unsafe_path: &Path) -> io::Result<Vec<OsString>> {
    let mut pending: VecDeque<Part> = parts(unsafe_path).collect();
    let mut current: Vec<OsString> = Vec::new();
    let mut hops = 0_usize;

    while let Some(part) = pending.pop_front() {
        let name = match part {
            Part::Parent => {
                let _ = current.pop();
                continue;
            }
            Part::Name(name) => name,
        };

        let mut candidate = root.to_path_buf();
        candidate.extend(&current);
        candidate.push(&name);

        let meta = match std::fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                current.push(name);
                continue;
            }
            Err(e) => return Err(e),
        };
        if !meta.file_type().is_symlink() {
            current.push(name);
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(io::Error::other(format!(
                "too many symlinks resolving {}",
                unsafe_path.display()
            )));
        }
        let target = std::fs::read_link(&candidate)?;
        if target.is_absolute() {
            current.clear();
        }
        for part in parts(&target).collect::<Vec<_>>().into_iter().rev() {
            pending.push_front(part);
        }
    }
    Ok(current)
}

/// Joins `unsafe_path` onto `root`, resolving symlinks without leaving
/// `root`.
///
/// # Errors
///
/// Returns an error if a component cannot be inspected or the symlink
/// chain exceeds [`MAX_SYMLINK_HOPS`].
pub fn secure_join(root: &Path, unsafe_path: &Path) -> io::Result<PathBuf> {
    let mut joined = root.to_path_buf();
    joined.extend(resolve_components(root, unsafe_path)?);
    Ok(joined)
}

/// Resolves `destination` inside `root` and returns it as an absolute
/// path as seen from inside the container.
///
/// # Errors
///
/// Same as [`secure_join`].
pub fn resolve_in_root(root: &Path, destination: &str) -> io::Result<String> {
    let components = resolve_components(root, Path::new(destination))?;
    let mut resolved = PathBuf::from("/");
    resolved.extend(components);
    Ok(resolved.to_string_lossy().into_owned())
}
