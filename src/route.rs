//! Route resolution against the source tree.
//!
//! URL paths map onto files under the source root. A directory or file whose
//! name has the form `[param]suffix` is a dynamic segment: it matches any path
//! segment that has no literal counterpart, and binds `param` to the segment
//! with `suffix` trimmed from its end.
//!
//! ```text
//! src/
//! ├── about.html            /about.html
//! ├── posts/
//! │   ├── [slug].html       /posts/hello.html     → slug = "hello"
//! │   └── _data/            export-only: one entry per slug
//! └── users/
//!     └── [id]/
//!         └── profile.html  /users/42/profile.html → id = "42"
//! ```
//!
//! A directory may hold at most one dynamic entry. Two or more is rejected as
//! [`RouteError::AmbiguousDynamic`], both by [`validate_tree`] at startup and
//! by the resolver itself.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Captured parameter name → value for one request
pub type RouteParams = BTreeMap<String, String>;

static DYNAMIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]*)\](.*)$").expect("valid dynamic segment regex"));

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("route not found: {0}")]
    NotFound(String),
    #[error("more than one dynamic entry in {}: {}", dir.display(), names.join(", "))]
    AmbiguousDynamic { dir: PathBuf, names: Vec<String> },
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One on-disk name, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Dynamic { param: String, suffix: String },
}

impl Segment {
    pub fn parse(name: &str) -> Segment {
        match DYNAMIC_NAME.captures(name) {
            Some(caps) => Segment::Dynamic {
                param: caps[1].to_string(),
                suffix: caps[2].to_string(),
            },
            None => Segment::Literal(name.to_string()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Segment::Dynamic { .. })
    }
}

/// Whether any component of a `/`-separated relative path is dynamic
pub fn has_dynamic_component(rel: &str) -> bool {
    rel.split('/').any(|c| Segment::parse(c).is_dynamic())
}

/// Outcome of [`RouteResolver::resolve`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// On-disk file the path resolved to, or `None` when the path already
    /// names an existing file and no substitution happened
    pub file: Option<PathBuf>,
    pub params: RouteParams,
}

#[derive(Debug)]
struct DynamicEntry {
    name: String,
    param: String,
    suffix: String,
    is_dir: bool,
}

#[derive(Debug)]
struct DirListing {
    modified: Option<SystemTime>,
    dynamic: Option<DynamicEntry>,
}

#[derive(Debug)]
pub struct RouteResolver {
    root: PathBuf,
    listings: Mutex<HashMap<PathBuf, Arc<DirListing>>>,
}

impl RouteResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            listings: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a URL path (with or without leading `/`) against the source root.
    ///
    /// Literal names always win over the dynamic entry of a directory. The
    /// walk stops at the first file; remaining segments are ignored.
    pub fn resolve(&self, url_path: &str) -> Result<Resolution, RouteError> {
        let rel = url_path.trim_start_matches('/');
        if rel.split('/').any(|s| s == "..") {
            return Err(RouteError::NotFound(url_path.to_string()));
        }

        if self.root.join(rel).exists() {
            return Ok(Resolution::default());
        }

        let mut current = self.root.clone();
        let mut params = RouteParams::new();

        for segment in rel.split('/') {
            if segment.is_empty() {
                continue;
            }

            let literal = current.join(segment);
            if let Ok(meta) = fs::metadata(&literal) {
                current = literal;
                if meta.is_dir() {
                    continue;
                }
                break;
            }

            let listing = self.listing(&current)?;
            let Some(dynamic) = listing.dynamic.as_ref() else {
                return Err(RouteError::NotFound(url_path.to_string()));
            };

            let value = segment.strip_suffix(&dynamic.suffix).unwrap_or(segment);
            debug!("Bound [{}] = {:?} in {}", dynamic.param, value, current.display());
            params.insert(dynamic.param.clone(), value.to_string());
            current = current.join(&dynamic.name);
            if !dynamic.is_dir {
                break;
            }
        }

        Ok(Resolution {
            file: Some(current),
            params,
        })
    }

    /// Parsed listing of `dir`, cached until the directory's mtime changes
    fn listing(&self, dir: &Path) -> Result<Arc<DirListing>, RouteError> {
        let modified = fs::metadata(dir)
            .map_err(|source| RouteError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .modified()
            .ok();

        {
            let cache = self.listings.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.get(dir) {
                if modified.is_some() && cached.modified == modified {
                    return Ok(Arc::clone(cached));
                }
            }
        }

        let listing = Arc::new(DirListing {
            modified,
            dynamic: scan_dynamic_entry(dir)?,
        });
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dir.to_path_buf(), Arc::clone(&listing));
        Ok(listing)
    }
}

/// The single dynamic entry of `dir`, if any
fn scan_dynamic_entry(dir: &Path) -> Result<Option<DynamicEntry>, RouteError> {
    let io_err = |source| RouteError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Segment::Dynamic { param, suffix } = Segment::parse(&name) {
            let is_dir = entry.file_type().map_err(io_err)?.is_dir();
            found.push(DynamicEntry {
                name,
                param,
                suffix,
                is_dir,
            });
        }
    }

    if found.len() > 1 {
        let mut names: Vec<String> = found.into_iter().map(|e| e.name).collect();
        names.sort();
        return Err(RouteError::AmbiguousDynamic {
            dir: dir.to_path_buf(),
            names,
        });
    }
    Ok(found.pop())
}

/// Reject source trees with more than one dynamic entry in any directory.
///
/// Hidden directories and `_data` directories are not routable and are skipped.
pub fn validate_tree(root: &Path) -> Result<(), RouteError> {
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_unroutable(e.file_name().to_str()));

    for entry in walker {
        let entry = entry.map_err(|e| RouteError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop")),
        })?;
        if entry.file_type().is_dir() {
            scan_dynamic_entry(entry.path())?;
        }
    }
    Ok(())
}

/// Hidden entries and `_data` directories never take part in routing or export
pub(crate) fn is_unroutable(name: Option<&str>) -> bool {
    match name {
        Some(name) => name.starts_with('.') || name == "_data",
        None => true,
    }
}
