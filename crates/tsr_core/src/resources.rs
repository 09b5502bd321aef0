//! In-memory virtual filesystem for game assets.
//!
//! A [`VirtualResourcePack`] is a tree of directories and files held entirely in
//! memory. Loaders never touch the real filesystem directly: a pack is either
//! built by hand (tests, generated content) or imported eagerly from a real
//! directory with [`VirtualResourcePack::from_directory`], and everything
//! downstream reads through the [`ResourcePack`] trait.
//!
//! Paths are `/`-separated and normalized at the access boundary (see
//! [`normalize`]); the tree itself only ever stores plain segment names.
//! Relative paths resolve against the pack root.
//!
//! Writes go through a [`FileHandle`]: `open` copies the stored bytes into a
//! private buffer, and the buffer is committed back into the tree on `flush`,
//! `close`, or when the handle is dropped.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::PackError;

/// Read-only capability handed to asset loaders.
pub trait ResourcePack {
    /// Full contents of the file at `path`.
    fn read_bytes(&self, path: &str) -> Result<Cow<'_, [u8]>, PackError>;

    /// Whether anything (file or directory) exists at `path`. Never fails.
    fn exists(&self, path: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(BTreeMap<String, Node>),
    File(Vec<u8>),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    fn empty_dir() -> Self {
        Node::Directory(BTreeMap::new())
    }
}

/// Normalize a virtual path.
///
/// Empty segments and `.` are dropped, `..` removes the previously kept
/// segment (and does nothing at the root), and a leading `/` is preserved.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut kept: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                kept.pop();
            }
            name => kept.push(name),
        }
    }
    let joined = kept.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Normalized path anchored at the pack root. Used for lookups and error text.
fn rooted(path: &str) -> String {
    let normalized = normalize(path);
    if normalized.starts_with('/') {
        normalized
    } else {
        format!("/{normalized}")
    }
}

fn segments(rooted_path: &str) -> impl Iterator<Item = &str> {
    rooted_path.split('/').filter(|s| !s.is_empty())
}

/// Split a rooted path into its parent directory and final name.
/// Returns `None` for the root itself.
fn split_parent(rooted_path: &str) -> Option<(String, String)> {
    let (parent, name) = rooted_path.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    let parent = if parent.is_empty() { "/" } else { parent };
    Some((parent.to_string(), name.to_string()))
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualResourcePack {
    root: Node,
}

impl Default for VirtualResourcePack {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualResourcePack {
    pub fn new() -> Self {
        Self {
            root: Node::empty_dir(),
        }
    }

    /// Mirror a real directory tree into a new pack, reading every file eagerly.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, PackError> {
        let root = dir.as_ref();
        let mut pack = Self::new();
        let mut file_count = 0usize;
        let mut byte_count = 0usize;

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                PackError::io(path, e.into())
            })?;
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let virtual_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_dir() {
                pack.mkdir_all(&virtual_path)?;
            } else if entry.file_type().is_file() {
                let bytes = fs::read(entry.path()).map_err(|e| PackError::io(entry.path(), e))?;
                file_count += 1;
                byte_count += bytes.len();
                pack.write_file(&virtual_path, bytes)?;
            } else {
                log::debug!("Skipping non-regular entry {}", entry.path().display());
            }
        }

        log::info!(
            "Imported {} files ({} bytes) from {}",
            file_count,
            byte_count,
            root.display()
        );
        Ok(pack)
    }

    /// Write the whole tree out beneath `dir`, creating directories as needed.
    pub fn write_to_directory(&self, dir: impl AsRef<Path>) -> Result<(), PackError> {
        fn write_node(node: &Node, target: &Path) -> Result<(), PackError> {
            match node {
                Node::Directory(children) => {
                    fs::create_dir_all(target).map_err(|e| PackError::io(target, e))?;
                    for (name, child) in children {
                        write_node(child, &target.join(name))?;
                    }
                }
                Node::File(bytes) => {
                    fs::write(target, bytes).map_err(|e| PackError::io(target, e))?;
                }
            }
            Ok(())
        }
        write_node(&self.root, dir.as_ref())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.entry(path).is_ok()
    }

    /// Walk the tree to the node at `path`.
    ///
    /// Fails on the first offending segment: `FileNotFound` when a segment is
    /// missing, `NotADirectory` when a file is used as an intermediate segment.
    pub fn entry(&self, path: &str) -> Result<&Node, PackError> {
        let path = rooted(path);
        let mut node = &self.root;
        let mut walked = String::new();
        for segment in segments(&path) {
            let children = match node {
                Node::Directory(children) => children,
                Node::File(_) => return Err(PackError::NotADirectory(walked)),
            };
            walked.push('/');
            walked.push_str(segment);
            node = children
                .get(segment)
                .ok_or_else(|| PackError::FileNotFound(walked.clone()))?;
        }
        Ok(node)
    }

    fn entry_mut(&mut self, path: &str) -> Result<&mut Node, PackError> {
        let path = rooted(path);
        let mut node = &mut self.root;
        let mut walked = String::new();
        for segment in segments(&path) {
            let children = match node {
                Node::Directory(children) => children,
                Node::File(_) => return Err(PackError::NotADirectory(walked)),
            };
            walked.push('/');
            walked.push_str(segment);
            node = children
                .get_mut(segment)
                .ok_or_else(|| PackError::FileNotFound(walked.clone()))?;
        }
        Ok(node)
    }

    fn dir_mut(&mut self, path: &str) -> Result<&mut BTreeMap<String, Node>, PackError> {
        match self.entry_mut(path)? {
            Node::Directory(children) => Ok(children),
            Node::File(_) => Err(PackError::NotADirectory(rooted(path))),
        }
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), PackError> {
        let path = rooted(path);
        let Some((parent, name)) = split_parent(&path) else {
            return Err(PackError::FileExists(path));
        };
        let children = self.dir_mut(&parent)?;
        if children.contains_key(&name) {
            return Err(PackError::FileExists(path));
        }
        children.insert(name, Node::empty_dir());
        Ok(())
    }

    /// Create `path` and any missing parents. Existing directories are fine;
    /// a file anywhere along the way is `NotADirectory`.
    pub fn mkdir_all(&mut self, path: &str) -> Result<(), PackError> {
        let path = rooted(path);
        let mut node = &mut self.root;
        let mut walked = String::new();
        for segment in segments(&path) {
            let children = match node {
                Node::Directory(children) => children,
                Node::File(_) => return Err(PackError::NotADirectory(walked)),
            };
            walked.push('/');
            walked.push_str(segment);
            node = children
                .entry(segment.to_string())
                .or_insert_with(Node::empty_dir);
        }
        match node {
            Node::Directory(_) => Ok(()),
            Node::File(_) => Err(PackError::NotADirectory(walked)),
        }
    }

    /// Open an existing file for reading and writing.
    ///
    /// The handle starts at offset 0 with a copy of the stored bytes; writes
    /// overwrite in place and extend past the end.
    pub fn open(&mut self, path: &str) -> Result<FileHandle<'_>, PackError> {
        let path = rooted(path);
        let content = match self.entry(&path)? {
            Node::File(bytes) => bytes.clone(),
            Node::Directory(_) => return Err(PackError::NotAFile(path)),
        };
        Ok(FileHandle {
            pack: self,
            path,
            buffer: Cursor::new(content),
            modified: false,
        })
    }

    /// Create (or truncate) a file inside an existing directory.
    pub fn create(&mut self, path: &str) -> Result<FileHandle<'_>, PackError> {
        let path = rooted(path);
        self.write_file(&path, Vec::new())?;
        Ok(FileHandle {
            pack: self,
            path,
            buffer: Cursor::new(Vec::new()),
            modified: false,
        })
    }

    /// Store `bytes` at `path`, replacing any existing file there.
    pub fn write_file(&mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Result<(), PackError> {
        let path = rooted(path);
        let Some((parent, name)) = split_parent(&path) else {
            return Err(PackError::NotAFile(path));
        };
        let children = self.dir_mut(&parent)?;
        if matches!(children.get(&name), Some(Node::Directory(_))) {
            return Err(PackError::NotAFile(path));
        }
        children.insert(name, Node::File(bytes.into()));
        Ok(())
    }

    /// Remove the file or directory (with everything under it) at `path`.
    /// The root cannot be removed.
    pub fn remove(&mut self, path: &str) -> Result<Node, PackError> {
        let path = rooted(path);
        let Some((parent, name)) = split_parent(&path) else {
            return Err(PackError::NotAFile(path));
        };
        self.dir_mut(&parent)?
            .remove(&name)
            .ok_or(PackError::FileNotFound(path))
    }

    pub fn read(&self, path: &str) -> Result<&[u8], PackError> {
        match self.entry(path)? {
            Node::File(bytes) => Ok(bytes),
            Node::Directory(_) => Err(PackError::NotAFile(rooted(path))),
        }
    }

    /// Names of the entries directly inside `path`, in sorted order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, PackError> {
        match self.entry(path)? {
            Node::Directory(children) => Ok(children.keys().cloned().collect()),
            Node::File(_) => Err(PackError::NotADirectory(rooted(path))),
        }
    }

    /// Every file in the pack as `(rooted path, bytes)`, depth-first in name order.
    pub fn files(&self) -> Vec<(String, &[u8])> {
        fn collect<'a>(node: &'a Node, prefix: &str, out: &mut Vec<(String, &'a [u8])>) {
            match node {
                Node::Directory(children) => {
                    for (name, child) in children {
                        collect(child, &format!("{prefix}/{name}"), out);
                    }
                }
                Node::File(bytes) => out.push((prefix.to_string(), bytes)),
            }
        }
        let mut out = Vec::new();
        collect(&self.root, "", &mut out);
        out
    }

    /// Content address of the file at `path`.
    pub fn content_hash(&self, path: &str) -> Result<String, PackError> {
        self.read(path).map(hash_bytes)
    }

    fn commit(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), PackError> {
        match self.entry_mut(path)? {
            Node::File(content) => {
                *content = bytes;
                Ok(())
            }
            Node::Directory(_) => Err(PackError::NotAFile(path.to_string())),
        }
    }
}

impl ResourcePack for VirtualResourcePack {
    fn read_bytes(&self, path: &str) -> Result<Cow<'_, [u8]>, PackError> {
        self.read(path).map(Cow::Borrowed)
    }

    fn exists(&self, path: &str) -> bool {
        VirtualResourcePack::exists(self, path)
    }
}

/// Buffered read/write access to one file of a [`VirtualResourcePack`].
///
/// Buffered writes are committed on `flush`, `close`, or drop.
pub struct FileHandle<'a> {
    pack: &'a mut VirtualResourcePack,
    path: String,
    buffer: Cursor<Vec<u8>>,
    modified: bool,
}

impl FileHandle<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Current buffer contents, including uncommitted writes.
    pub fn contents(&self) -> &[u8] {
        self.buffer.get_ref()
    }

    /// Shorten or extend the buffer to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buffer.get_mut().resize(len, 0);
        if self.buffer.position() > len as u64 {
            self.buffer.set_position(len as u64);
        }
        self.modified = true;
    }

    /// Write the buffer back into the pack at the original path.
    pub fn commit(&mut self) -> Result<(), PackError> {
        if !self.modified {
            return Ok(());
        }
        self.pack.commit(&self.path, self.buffer.get_ref().clone())?;
        self.modified = false;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), PackError> {
        self.commit()
    }
}

impl Read for FileHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read(buf)
    }
}

impl Write for FileHandle<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.buffer.write(buf)?;
        if written > 0 {
            self.modified = true;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit().map_err(io::Error::other)
    }
}

impl Seek for FileHandle<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl Drop for FileHandle<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.commit() {
            log::warn!("Failed to commit {} on drop: {err}", self.path);
        }
    }
}

/// [`ResourcePack`] reading straight from a real directory, without importing.
#[derive(Debug, Clone)]
pub struct DirectoryPack {
    root: PathBuf,
}

impl DirectoryPack {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a virtual path onto the real tree, checking each segment on the way.
    fn resolve(&self, path: &str) -> Result<PathBuf, PackError> {
        let path = rooted(path);
        let mut real = self.root.clone();
        let mut walked = String::new();
        for segment in segments(&path) {
            if real.is_file() {
                return Err(PackError::NotADirectory(walked));
            }
            walked.push('/');
            walked.push_str(segment);
            real.push(segment);
            if !real.exists() {
                return Err(PackError::FileNotFound(walked));
            }
        }
        Ok(real)
    }
}

impl ResourcePack for DirectoryPack {
    fn read_bytes(&self, path: &str) -> Result<Cow<'_, [u8]>, PackError> {
        let real = self.resolve(path)?;
        if real.is_dir() {
            return Err(PackError::NotAFile(rooted(path)));
        }
        fs::read(&real)
            .map(Cow::Owned)
            .map_err(|e| PackError::io(real, e))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }
}
