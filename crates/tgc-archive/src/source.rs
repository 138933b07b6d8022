//! Read-only access to a data export that is either an unpacked directory or
//! a `.zip` file.
//!
//! Entries are never extracted to disk. Zip entry names are sanitized up
//! front (no `..`, no absolute paths, no symlinks) and every read is bounded
//! by [`ReadLimits`].

use std::{
    fs::{self, File},
    io::Read,
    path::{Component, Path, PathBuf},
};

use zip::ZipArchive;

use tgc_core::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct ReadLimits {
    /// Maximum number of file entries in an archive.
    pub max_files: usize,
    /// Maximum bytes read across the lifetime of one source.
    pub max_total_bytes: u64,
    /// Maximum bytes read per file.
    pub max_file_bytes: u64,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_files: 200_000,
            max_total_bytes: 8 * 1024 * 1024 * 1024, // 8GB
            max_file_bytes: 1024 * 1024 * 1024,      // 1GB per file
        }
    }
}

enum Backing {
    Dir(PathBuf),
    Zip {
        archive: ZipArchive<File>,
        names: Vec<String>,
    },
}

pub struct ExportSource {
    origin: PathBuf,
    backing: Backing,
    /// Prefix (with trailing `/`) under which the export content lives.
    root: String,
    limits: ReadLimits,
    bytes_read: u64,
}

impl ExportSource {
    pub fn open(path: &Path, limits: ReadLimits) -> Result<Self> {
        let backing = if path.is_dir() {
            Backing::Dir(path.to_path_buf())
        } else if is_zip(path) {
            open_zip(path, limits)?
        } else {
            return Err(Error::InvalidPath {
                path: path.to_path_buf(),
                reason: "expected a directory or a .zip file".to_string(),
            });
        };
        Ok(Self {
            origin: path.to_path_buf(),
            backing,
            root: String::new(),
            limits,
            bytes_read: 0,
        })
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Point the source at the first directory containing one of `markers`,
    /// either the top level or a single nested folder. Returns false when no
    /// marker was found.
    pub fn locate_root(&mut self, markers: &[&str]) -> Result<bool> {
        let found = match &self.backing {
            Backing::Dir(dir) => locate_dir_root(dir, markers)?,
            Backing::Zip { names, .. } => locate_zip_root(names, markers),
        };
        match found {
            Some(root) => {
                tracing::debug!(origin = %self.origin.display(), root = %root, "export root located");
                self.root = root;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn exists(&self, rel: &str) -> bool {
        let full = format!("{}{rel}", self.root);
        match &self.backing {
            Backing::Dir(dir) => dir.join(&full).exists(),
            Backing::Zip { names, .. } => names
                .iter()
                .any(|n| n == &full || n.starts_with(&format!("{full}/"))),
        }
    }

    /// Files under `prefix` (relative to the root), sorted.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = match &self.backing {
            Backing::Dir(dir) => {
                let base = dir.join(&self.root);
                let mut files = Vec::new();
                walk_files(&base, &base, &mut files)?;
                files
                    .into_iter()
                    .filter(|f| f.starts_with(prefix))
                    .collect::<Vec<_>>()
            }
            Backing::Zip { names, .. } => names
                .iter()
                .filter_map(|n| n.strip_prefix(self.root.as_str()))
                .filter(|n| n.starts_with(prefix))
                .map(str::to_string)
                .collect(),
        };
        out.sort();
        Ok(out)
    }

    /// Parse a JSON file; `None` when the file is not part of the export.
    pub fn read_json(&mut self, rel: &str) -> Result<Option<serde_json::Value>> {
        let full = format!("{}{rel}", self.root);
        let rel_path = sanitize_rel_path(Path::new(&full))?;
        let max_file = self.limits.max_file_bytes;

        let bytes = match &mut self.backing {
            Backing::Dir(dir) => {
                let path = dir.join(&rel_path);
                if !path.is_file() {
                    return Ok(None);
                }
                let f = File::open(&path)?;
                read_bounded(f, max_file, &full)?
            }
            Backing::Zip { archive, names } => {
                if !names.iter().any(|n| n == &full) {
                    return Ok(None);
                }
                let entry = archive
                    .by_name(&full)
                    .map_err(|e| Error::Provider(format!("zip error: {e}")))?;
                if entry.size() > max_file {
                    return Err(too_large(&full, entry.size(), max_file));
                }
                read_bounded(entry, max_file, &full)?
            }
        };

        self.bytes_read = self.bytes_read.saturating_add(bytes.len() as u64);
        if self.bytes_read > self.limits.max_total_bytes {
            return Err(Error::InvalidPath {
                path: self.origin.clone(),
                reason: format!(
                    "export exceeds max_total_bytes limit ({})",
                    self.limits.max_total_bytes
                ),
            });
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn open_zip(path: &Path, limits: ReadLimits) -> Result<Backing> {
    let f = File::open(path)?;
    let mut archive =
        ZipArchive::new(f).map_err(|e| Error::Provider(format!("zip error: {e}")))?;

    let mut names = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::Provider(format!("zip error: {e}")))?;
        let name = entry.name().replace('\\', "/");
        if name.is_empty() || entry.is_dir() {
            continue;
        }

        // Zip symlinks are commonly encoded via unix mode bits. Disallow them.
        if let Some(mode) = entry.unix_mode() {
            if mode & 0o170000 == 0o120000 {
                return Err(Error::InvalidPath {
                    path: PathBuf::from(&name),
                    reason: "archive contains symlink entry".to_string(),
                });
            }
        }

        let rel = sanitize_rel_path(Path::new(&name))?;
        names.push(path_to_slash(&rel));
        if names.len() > limits.max_files {
            return Err(Error::InvalidPath {
                path: path.to_path_buf(),
                reason: format!("archive exceeds max_files limit ({})", limits.max_files),
            });
        }
    }
    Ok(Backing::Zip { archive, names })
}

fn locate_dir_root(dir: &Path, markers: &[&str]) -> Result<Option<String>> {
    if markers.iter().any(|m| dir.join(m).exists()) {
        return Ok(Some(String::new()));
    }
    let mut subdirs = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    subdirs.sort();
    for sub in subdirs {
        if markers.iter().any(|m| sub.join(m).exists()) {
            if let Some(name) = sub.file_name().and_then(|n| n.to_str()) {
                return Ok(Some(format!("{name}/")));
            }
        }
    }
    Ok(None)
}

fn locate_zip_root(names: &[String], markers: &[&str]) -> Option<String> {
    for name in names {
        for marker in markers {
            if name == marker || name.starts_with(&format!("{marker}/")) {
                return Some(String::new());
            }
            let nested = format!("/{marker}");
            if let Some(pos) = name.find(&nested) {
                let after = &name[pos + nested.len()..];
                let prefix = &name[..=pos];
                if (after.is_empty() || after.starts_with('/')) && !prefix[..pos].contains('/') {
                    return Some(prefix.to_string());
                }
            }
        }
    }
    None
}

fn walk_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(path_to_slash(rel));
        }
    }
    Ok(())
}

fn path_to_slash(p: &Path) -> String {
    p.components()
        .filter_map(|c| match c {
            Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn read_bounded<R: Read>(r: R, max_bytes: u64, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    // Enforce an upper bound even if zip metadata lies.
    let mut limited = r.take(max_bytes + 1);
    limited.read_to_end(&mut buf)?;
    if buf.len() as u64 > max_bytes {
        return Err(too_large(name, buf.len() as u64, max_bytes));
    }
    Ok(buf)
}

fn too_large(name: &str, size: u64, max: u64) -> Error {
    Error::InvalidPath {
        path: PathBuf::from(name),
        reason: format!("file too large: {size} bytes (max {max})"),
    }
}

fn sanitize_rel_path(p: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::Normal(os) => out.push(os),
            Component::ParentDir => {
                return Err(Error::InvalidPath {
                    path: p.to_path_buf(),
                    reason: "path traversal".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath {
                    path: p.to_path_buf(),
                    reason: "absolute path".to_string(),
                });
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(Error::InvalidPath {
            path: p.to_path_buf(),
            reason: "empty path".to_string(),
        });
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    pub(crate) fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub(crate) fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let f = File::create(path).unwrap();
        let mut zw = ZipWriter::new(f);
        for (name, body) in files {
            zw.start_file(*name, FileOptions::default()).unwrap();
            zw.write_all(body.as_bytes()).unwrap();
        }
        zw.finish().unwrap();
    }

    #[test]
    fn zip_rejects_path_traversal() {
        let base = tmp("tgc-zip-traversal");
        let zip_path = base.join("a.zip");
        write_zip(&zip_path, &[("../evil.json", "{}")]);

        let err = ExportSource::open(&zip_path, ReadLimits::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn zip_enforces_per_file_size_limit() {
        let base = tmp("tgc-zip-size");
        let zip_path = base.join("a.zip");
        write_zip(&zip_path, &[("big.json", "[1,2,3,4,5]")]);

        let limits = ReadLimits {
            max_file_bytes: 4,
            ..ReadLimits::default()
        };
        let mut src = ExportSource::open(&zip_path, limits).unwrap();
        let err = src.read_json("big.json").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn zip_locates_nested_root() {
        let base = tmp("tgc-zip-root");
        let zip_path = base.join("export.zip");
        write_zip(
            &zip_path,
            &[
                ("insta-123/connections/followers_1.json", "[]"),
                ("insta-123/your_instagram_activity/likes/liked_posts.json", "{\"a\":1}"),
            ],
        );

        let mut src = ExportSource::open(&zip_path, ReadLimits::default()).unwrap();
        assert!(src.locate_root(&["your_instagram_activity"]).unwrap());
        assert_eq!(src.root(), "insta-123/");
        assert!(src.exists("connections"));
        let v = src
            .read_json("your_instagram_activity/likes/liked_posts.json")
            .unwrap()
            .unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(src.list("connections/").unwrap(), vec!["connections/followers_1.json"]);
        assert!(src.read_json("missing.json").unwrap().is_none());
    }

    #[test]
    fn directory_source_reads_and_lists() {
        let base = tmp("tgc-dir-src");
        fs::create_dir_all(base.join("inner/a/b")).unwrap();
        fs::write(base.join("inner/a/b/x.json"), "{\"ok\":true}").unwrap();
        fs::write(base.join("inner/result.json"), "{}").unwrap();

        let mut src = ExportSource::open(&base, ReadLimits::default()).unwrap();
        assert!(src.locate_root(&["result.json"]).unwrap());
        assert_eq!(src.root(), "inner/");
        assert_eq!(src.list("a/").unwrap(), vec!["a/b/x.json"]);
        assert_eq!(src.read_json("a/b/x.json").unwrap().unwrap()["ok"], true);
        assert!(src.read_json("../outside.json").is_err());
    }

    #[test]
    fn plain_file_is_not_an_export() {
        let base = tmp("tgc-not-export");
        let p = base.join("notes.txt");
        fs::write(&p, "x").unwrap();
        assert!(ExportSource::open(&p, ReadLimits::default()).is_err());
    }
}
