//! SHA-256 helpers behind artifact content addressing.
//!
//! - `ContentHash`: a full 64-character digest
//! - `hash_bytes()`: arbitrary byte hashing
//! - `hash_file()`: streaming single file hashing
//! - `hash_directory()`: deterministic hashing of a source tree

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character SHA-256 digest in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while reading content to hash.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to walk directory {path}: {message}")]
  WalkDir { path: String, message: String },

  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read symlink {path}: {source}")]
  ReadSymlink {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Hash a file's contents without loading it into memory at once.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let read_err = |source| HashError::ReadFile {
    path: path.display().to_string(),
    source,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Compute a deterministic hash of a source directory.
///
/// The hash covers relative paths, file contents and symlink targets; it
/// ignores timestamps and permissions, so a rebuilt but byte-identical tree
/// hashes the same. Entries whose file name is in `exclude` are skipped along
/// with everything below them.
///
/// ```ignore
/// let hash = hash_directory(Path::new("./function"), &["__pycache__", ".git"])?;
/// ```
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, HashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| HashError::WalkDir {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    let entry_path = entry.path();

    // Separators are normalized so the same tree hashes alike on every platform
    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel_path, hash_file(entry_path)?)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|source| HashError::ReadSymlink {
        path: entry_path.display().to_string(),
        source,
      })?;
      format!("L:{}:{}", rel_path, hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      continue;
    };

    entries.push((rel_path, line));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, line) in entries {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn hash_bytes_known_vector() {
    // sha256("abc")
    assert_eq!(
      hash_bytes(b"abc").0,
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("main.py");
    fs::write(&file, "def entryPoint(event): pass").unwrap();

    assert_eq!(hash_file(&file).unwrap(), hash_bytes(b"def entryPoint(event): pass"));
  }

  #[test]
  fn hash_file_missing_is_error() {
    let temp = tempdir().unwrap();
    let err = hash_file(&temp.path().join("nope.zip")).unwrap_err();
    assert!(matches!(err, HashError::ReadFile { .. }));
  }

  #[test]
  fn directory_hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("main.py"), "print('hi')").unwrap();
    fs::write(temp.path().join("requirements.txt"), "cloudevents").unwrap();

    let first = hash_directory(temp.path(), &[]).unwrap();
    let second = hash_directory(temp.path(), &[]).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.0.len(), 64);
  }

  #[test]
  fn directory_hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("main.py"), "v1").unwrap();
    let before = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join("main.py"), "v2").unwrap();
    let after = hash_directory(temp.path(), &[]).unwrap();

    assert_ne!(before, after);
  }

  #[test]
  fn directory_hash_respects_exclusions() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("main.py"), "code").unwrap();
    let clean = hash_directory(temp.path(), &["__pycache__"]).unwrap();

    fs::create_dir(temp.path().join("__pycache__")).unwrap();
    fs::write(temp.path().join("__pycache__/main.cpython-312.pyc"), "bytecode").unwrap();
    let with_cache = hash_directory(temp.path(), &["__pycache__"]).unwrap();

    assert_eq!(clean, with_cache);
  }

  #[test]
  fn same_content_different_layout_differs() {
    let flat = tempdir().unwrap();
    fs::write(flat.path().join("main.py"), "code").unwrap();

    let nested = tempdir().unwrap();
    fs::create_dir(nested.path().join("src")).unwrap();
    fs::write(nested.path().join("src/main.py"), "code").unwrap();

    assert_ne!(
      hash_directory(flat.path(), &[]).unwrap(),
      hash_directory(nested.path(), &[]).unwrap()
    );
  }
}
