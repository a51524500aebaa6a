//! File-system access used to load workspace documents.

use std::collections::BTreeMap;
use std::io;

use parking_lot::RwLock;
use url::Url;

/// Entry returned by [`FileSystemProvider::read_directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemNode {
	pub uri: Url,
	pub is_file: bool,
	pub is_directory: bool,
}

impl FileSystemNode {
	/// Last path segment of the entry.
	pub fn name(&self) -> &str {
		self.uri.path_segments().and_then(|mut segments| segments.next_back()).unwrap_or_default()
	}
}

pub trait FileSystemProvider: Send + Sync {
	fn read_file(&self, uri: &Url) -> io::Result<String>;

	/// Direct children of a directory, sorted by uri.
	fn read_directory(&self, uri: &Url) -> io::Result<Vec<FileSystemNode>>;
}

fn not_a_file(uri: &Url) -> io::Error {
	io::Error::new(io::ErrorKind::InvalidInput, format!("{uri} is not a file uri"))
}

/// Reads `file://` uris from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFileSystem;

impl FileSystemProvider for DiskFileSystem {
	fn read_file(&self, uri: &Url) -> io::Result<String> {
		let path = uri.to_file_path().map_err(|()| not_a_file(uri))?;
		std::fs::read_to_string(path)
	}

	fn read_directory(&self, uri: &Url) -> io::Result<Vec<FileSystemNode>> {
		let path = uri.to_file_path().map_err(|()| not_a_file(uri))?;
		let mut nodes = Vec::new();
		for entry in std::fs::read_dir(path)? {
			let entry = entry?;
			let file_type = entry.file_type()?;
			let Ok(uri) = Url::from_file_path(entry.path()) else {
				continue;
			};
			nodes.push(FileSystemNode {
				uri,
				is_file: file_type.is_file(),
				is_directory: file_type.is_dir(),
			});
		}
		nodes.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
		Ok(nodes)
	}
}

/// File contents held in memory, keyed by uri. Directories are implied by
/// the paths of the files.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
	files: RwLock<BTreeMap<Url, String>>,
}

impl InMemoryFileSystem {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates or replaces a file.
	pub fn insert(&self, uri: Url, text: impl Into<String>) {
		self.files.write().insert(uri, text.into());
	}

	pub fn remove(&self, uri: &Url) -> Option<String> {
		self.files.write().remove(uri)
	}
}

impl FileSystemProvider for InMemoryFileSystem {
	fn read_file(&self, uri: &Url) -> io::Result<String> {
		self.files
			.read()
			.get(uri)
			.cloned()
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{uri} does not exist")))
	}

	fn read_directory(&self, uri: &Url) -> io::Result<Vec<FileSystemNode>> {
		let mut prefix = uri.path().to_string();
		if !prefix.ends_with('/') {
			prefix.push('/');
		}
		let files = self.files.read();
		let mut nodes: Vec<FileSystemNode> = Vec::new();
		for file in files.keys().filter(|file| file.scheme() == uri.scheme() && file.host() == uri.host()) {
			let Some(rest) = file.path().strip_prefix(&prefix) else {
				continue;
			};
			let node = match rest.split_once('/') {
				None => FileSystemNode {
					uri: file.clone(),
					is_file: true,
					is_directory: false,
				},
				Some((dir, _)) => {
					let mut dir_uri = uri.clone();
					dir_uri.set_path(&format!("{prefix}{dir}"));
					FileSystemNode {
						uri: dir_uri,
						is_file: false,
						is_directory: true,
					}
				}
			};
			if !nodes.contains(&node) {
				nodes.push(node);
			}
		}
		if nodes.is_empty() {
			return Err(io::Error::new(io::ErrorKind::NotFound, format!("{uri} is not a directory")));
		}
		nodes.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
		Ok(nodes)
	}
}
