//! Static export: render every route by crawling a local instance of the server.
//!
//! The crawl plans its targets from the source tree first, then fetches them
//! in order from an ephemeral listener on `127.0.0.1:0`:
//!
//! ```text
//! src/index.html             → /            docs/index.html
//!                            → /fr/         docs/fr/index.html   (per known language)
//! src/style.css              → /style.css   docs/style.css
//! src/posts/[slug].html      → /posts/alice.html  docs/posts/alice.html
//! src/posts/_data/alice.json   (one value per entry; not exported itself)
//! ```
//!
//! A non-2xx response aborts the crawl. Files written before the failure are
//! left in place.

use crate::config::{extension_of, Config};
use crate::minify::{self, MinifyError};
use crate::render::{RenderError, Site};
use crate::route::{has_dynamic_component, is_unroutable, Segment};
use crate::server;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("dynamic route {route} has no data directory at {}", path.display())]
    DataDirMissing { route: String, path: PathBuf },
    #[error("generate {url} failed {status}: {body}")]
    Fetch {
        url: String,
        status: u16,
        body: String,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot minify {}: {source}", path.display())]
    Minify {
        path: PathBuf,
        #[source]
        source: MinifyError,
    },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

/// One URL to fetch and where its body goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    /// URL path on the local server, starting with `/`
    pub url_path: String,
    /// Output file, relative to the output directory
    pub output: PathBuf,
}

impl ExportTarget {
    fn new(rel: &str) -> Self {
        Self {
            url_path: url_for(rel),
            output: rel.split('/').collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportSummary {
    pub files_written: usize,
}

/// Render the whole site into `config.out_dir`
pub async fn export(config: &Config) -> Result<ExportSummary, ExportError> {
    let site = Arc::new(Site::open(config.clone())?.without_translation_persistence());

    // The listener is bound before the server task starts, so connections
    // made by the crawl queue up instead of being refused.
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|source| io_error(Path::new("127.0.0.1:0"), source))?;
    let addr = listener
        .local_addr()
        .map_err(|source| io_error(Path::new("127.0.0.1:0"), source))?;
    info!("Export server listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(listener, Arc::clone(&site), async move {
        let _ = shutdown_rx.await;
    }));

    let result = crawl(config, &site.languages(), &format!("http://{}", addr)).await;

    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Export server stopped with an error: {}", e),
        Err(e) => warn!("Export server task failed: {}", e),
    }

    result
}

async fn crawl(
    config: &Config,
    languages: &[String],
    base_url: &str,
) -> Result<ExportSummary, ExportError> {
    clear_dir(&config.out_dir)?;

    let targets = plan(config, languages)?;
    info!(
        "Exporting {} route(s) to {}",
        targets.len(),
        config.out_dir.display()
    );

    let exporter = Exporter::new(base_url, &config.out_dir)?;
    let summary = exporter.run(&targets).await?;

    info!(
        "✓ Export complete: {} file(s) in {}",
        summary.files_written,
        config.out_dir.display()
    );
    Ok(summary)
}

/// Every (URL, output file) pair the export will fetch, in directory-walk order.
///
/// Hidden entries and `_data` directories are skipped. Template files are
/// additionally exported once per language under `<lang>/`; dynamic routes
/// are expanded from their `_data` directories instead.
pub fn plan(config: &Config, languages: &[String]) -> Result<Vec<ExportTarget>, ExportError> {
    let root = &config.source_dir;
    let mut targets = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_unroutable(e.file_name().to_str()));

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let components: Vec<String> = rel
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();
        let rel = components.join("/");

        if has_dynamic_component(&rel) {
            for concrete in expand_dynamic(root, &components)? {
                targets.push(ExportTarget::new(&concrete.join("/")));
            }
            continue;
        }

        targets.push(ExportTarget::new(&rel));
        if config.is_template_path(&rel) {
            for lang in languages {
                targets.push(ExportTarget {
                    url_path: url_for(&format!("{}/{}", lang, rel)),
                    output: Path::new(lang).join(rel.split('/').collect::<PathBuf>()),
                });
            }
        }
    }

    Ok(targets)
}

/// Replace each dynamic component with the values listed in the `_data`
/// directory next to it. Several dynamic levels expand to every combination.
fn expand_dynamic(root: &Path, components: &[String]) -> Result<Vec<Vec<String>>, ExportError> {
    let mut expanded: Vec<Vec<String>> = vec![Vec::new()];

    for (depth, component) in components.iter().enumerate() {
        match Segment::parse(component) {
            Segment::Literal(name) => {
                for prefix in &mut expanded {
                    prefix.push(name.clone());
                }
            }
            Segment::Dynamic { suffix, .. } => {
                let parent: PathBuf = components[..depth].iter().collect();
                let data_dir = root.join(parent).join("_data");
                let values = data_values(&data_dir).map_err(|_| ExportError::DataDirMissing {
                    route: components.join("/"),
                    path: data_dir.clone(),
                })?;
                if values.is_empty() {
                    warn!("{} is empty, nothing to export", data_dir.display());
                }

                let mut next = Vec::with_capacity(expanded.len() * values.len());
                for prefix in &expanded {
                    for value in &values {
                        let mut concrete = prefix.clone();
                        concrete.push(format!("{}{}", value, suffix));
                        next.push(concrete);
                    }
                }
                expanded = next;
            }
        }
    }

    Ok(expanded)
}

/// Base names of the visible entries in a data directory, sorted
fn data_values(data_dir: &Path) -> io::Result<Vec<String>> {
    let mut values = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let value = match name.rfind('.') {
            Some(idx) => name[..idx].to_string(),
            None => name,
        };
        values.push(value);
    }
    values.sort();
    Ok(values)
}

/// URL path for a relative output path; `index.html` pages are fetched as directories
fn url_for(rel: &str) -> String {
    if rel == "index.html" {
        "/".to_string()
    } else if let Some(dir) = rel.strip_suffix("/index.html") {
        format!("/{}/", dir)
    } else {
        format!("/{}", rel)
    }
}

fn clear_dir(dir: &Path) -> Result<(), ExportError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(dir, source)),
    }
}

fn io_error(path: &Path, source: io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Fetches targets from a running server and writes them, minified, under the output directory
#[derive(Debug, Clone)]
pub struct Exporter {
    client: reqwest::Client,
    base_url: String,
    out_dir: PathBuf,
}

impl Exporter {
    pub fn new(base_url: &str, out_dir: &Path) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dirsite-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ExportError::Http {
                url: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            out_dir: out_dir.to_path_buf(),
        })
    }

    /// Fetch every target in order, stopping at the first failure
    pub async fn run(&self, targets: &[ExportTarget]) -> Result<ExportSummary, ExportError> {
        let mut summary = ExportSummary::default();
        let total = targets.len();
        for (index, target) in targets.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, target.url_path);
            self.fetch_to_file(target).await?;
            summary.files_written += 1;
        }
        Ok(summary)
    }

    pub async fn fetch_to_file(&self, target: &ExportTarget) -> Result<(), ExportError> {
        let url = format!("{}{}", self.base_url, target.url_path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ExportError::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|source| ExportError::Http {
            url: url.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(ExportError::Fetch {
                url,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let dst = self.out_dir.join(&target.output);
        let ext = target.output.to_str().and_then(extension_of);
        let minified = minify::minify(ext, &body).map_err(|source| ExportError::Minify {
            path: dst.clone(),
            source,
        })?;

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        tokio::fs::write(&dst, minified)
            .await
            .map_err(|source| io_error(&dst, source))?;
        Ok(())
    }
}
