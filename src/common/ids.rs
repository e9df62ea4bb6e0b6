//! Identifiers for files, blocks and buffer frames.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifies a backing file by its absolute path.
///
/// A relative path and its absolute form compare equal. The path is not
/// otherwise normalized: `..` components and symlinks are kept as written,
/// so callers must spell a file the same way to share its cached blocks.
/// Cloning is cheap (`Arc`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Arc<Path>);

impl FileId {
    /// Create a file identity, resolving relative paths against the
    /// current working directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let absolute: PathBuf = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(path),
                Err(_) => path.to_path_buf(),
            }
        };
        FileId(Arc::from(absolute.as_path()))
    }

    /// The absolute path of the file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Identifies one block: a file plus a 0-based block offset.
///
/// Block `N` covers bytes `N × block_size .. (N + 1) × block_size` of the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub file: FileId,
    pub offset: u32,
}

impl BlockId {
    #[inline]
    pub fn new(file: FileId, offset: u32) -> Self {
        Self { file, offset }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({}#{})", self.file, self.offset)
    }
}

/// Index of a slot in the buffer pool's fixed frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}
