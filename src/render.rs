//! Render pipeline: one request in, one rendered page (or static file) out.
//!
//! ```text
//! /fr/users/42/profile.html
//!   → language      fr, remainder /users/42/profile.html
//!   → route         users/[id]/profile.html, {id: "42"}
//!   → template      Tera with s(), abs_path_of(), ... bound to fr
//!   → flush         language files, if a lookup backfilled anything
//! ```
//!
//! Everything here is blocking (filesystem + template work); the server runs
//! it on the blocking thread pool.

use crate::config::Config;
use crate::i18n::{self, StoreError, TranslationStore};
use crate::route::{self, RouteError, RouteResolver};
use crate::template::{self, RequestScope};
use serde::Serialize;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("failed to render template '{name}': {detail}")]
    Template { name: String, detail: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The parts of an HTTP request exposed to templates as `req`
#[derive(Debug, Clone, Serialize)]
pub struct PageRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

impl PageRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            query: None,
        }
    }
}

/// What to send back for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Output of a template, plus the file name it was requested as
    Page { name: String, body: String },
    /// A non-template file to be served as-is
    Static(PathBuf),
    /// A directory requested without its trailing `/`; points at the slashed URL
    Redirect(String),
}

#[derive(Debug)]
pub struct Site {
    config: Config,
    store: Arc<TranslationStore>,
    resolver: RouteResolver,
    persist_translations: bool,
}

impl Site {
    /// Load translations and check the source tree.
    ///
    /// A broken language file only fails startup in strict mode; otherwise it
    /// is logged and the site starts with whatever could be read.
    pub fn open(config: Config) -> Result<Self, RenderError> {
        let store = TranslationStore::new(
            &config.lang_dir,
            &config.default_lang,
            config.lang_auto_sync,
        );
        match store.load() {
            Ok(count) => info!(
                "Loaded {} language file(s) from {}",
                count,
                config.lang_dir.display()
            ),
            Err(e) if config.strict_lang => return Err(e.into()),
            Err(e) => warn!("Continuing without all translations: {}", e),
        }

        route::validate_tree(&config.source_dir)?;

        Ok(Self {
            resolver: RouteResolver::new(&config.source_dir),
            store: Arc::new(store),
            config,
            persist_translations: true,
        })
    }

    /// Keep translation backfills in memory only; used by the export crawl so
    /// rendering a site never rewrites its language files.
    pub fn without_translation_persistence(mut self) -> Self {
        self.persist_translations = false;
        self
    }

    pub fn store(&self) -> &Arc<TranslationStore> {
        &self.store
    }

    /// Known language codes right now
    pub fn languages(&self) -> Vec<String> {
        self.store.languages()
    }

    pub fn render(&self, request: &PageRequest) -> Result<Rendered, RenderError> {
        let mut path = request.path.clone();
        if path.ends_with('/') {
            path.push_str("index.html");
        }

        if !self.config.strict_lang {
            if let Err(e) = self.store.load() {
                warn!("Failed to reload language files: {}", e);
            }
        }

        let languages = self.store.languages();
        let negotiation = i18n::identify_language(&path, &languages, &self.config.default_lang);
        let name = negotiation.remainder.trim_start_matches('/').to_string();
        if name.split('/').any(|s| s == "..") {
            return Err(RouteError::NotFound(request.path.clone()).into());
        }

        if !self.config.is_template_path(&name) {
            let file = self.config.source_dir.join(&name);
            if file.is_dir() {
                let mut location = format!("{}/", request.path);
                if let Some(query) = &request.query {
                    location.push('?');
                    location.push_str(query);
                }
                return Ok(Rendered::Redirect(location));
            }
            return Ok(Rendered::Static(file));
        }

        let resolution = self.resolver.resolve(&name)?;
        let template_name = match &resolution.file {
            Some(file) => template::template_name(&self.config.source_dir, file)
                .ok_or_else(|| RouteError::NotFound(request.path.clone()))?,
            None => name.clone(),
        };
        debug!(
            "{} → {} [{}] {:?}",
            request.path, template_name, negotiation.lang, resolution.params
        );

        let mut tera = template::load(&self.config.source_dir, |n| {
            self.config.is_template_path(n)
        })
        .map_err(|e| template_error(&template_name, &e))?;
        template::register_functions(
            &mut tera,
            RequestScope {
                store: Arc::clone(&self.store),
                lang: negotiation.lang.clone(),
                lang_prefix: negotiation.prefix.clone(),
            },
        );

        let mut context = tera::Context::new();
        context.insert("req", request);
        context.insert("rel_path", &i18n::rel_path(&request.path, &languages));
        context.insert("lang", &negotiation.lang);
        context.insert("path_params", &resolution.params);

        let body = tera
            .render(&template_name, &context)
            .map_err(|e| template_error(&template_name, &e))?;

        if self.persist_translations {
            if let Err(e) = self.store.flush() {
                warn!("Failed to sync language files: {}", e);
            }
        }

        Ok(Rendered::Page { name, body })
    }
}

/// Tera's top-level message is terse; the useful part is further down the chain
fn template_error(name: &str, error: &tera::Error) -> RenderError {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    RenderError::Template {
        name: name.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    struct Fixture {
        _temp_dir: TempDir,
        config: Config,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        for (name, content) in files {
            let path = temp_dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
        }
        let config = Config {
            source_dir: temp_dir.path().join("src"),
            out_dir: temp_dir.path().join("docs"),
            lang_dir: temp_dir.path().join("lang"),
            ..Config::default()
        };
        fs::create_dir_all(&config.source_dir).unwrap();
        Fixture {
            _temp_dir: temp_dir,
            config,
        }
    }

    fn page_body(rendered: Rendered) -> String {
        match rendered {
            Rendered::Page { body, .. } => body,
            other => panic!("expected a page, got {:?}", other),
        }
    }

    // ==================== Render Tests ====================

    #[test]
    fn test_render_dynamic_route_with_language() {
        let f = fixture(&[
            (
                "src/users/[id]/profile.html",
                "{{ lang }}:{{ path_params.id }}:{{ rel_path }}",
            ),
            ("lang/en.json", "{}"),
            ("lang/fr.json", "{}"),
        ]);
        let site = Site::open(f.config.clone()).unwrap();

        let rendered = site.render(&PageRequest::get("/fr/users/42/profile.html"));
        let body = page_body(rendered.unwrap());

        assert_eq!(body, "fr:42:&#x2F;users&#x2F;42&#x2F;profile.html");
    }

    #[test]
    fn test_render_trailing_slash_uses_index() {
        let f = fixture(&[("src/docs/index.html", "docs index for {{ req.method }}")]);
        let site = Site::open(f.config.clone()).unwrap();

        let rendered = site.render(&PageRequest::get("/docs/")).unwrap();

        assert_eq!(
            rendered,
            Rendered::Page {
                name: "docs/index.html".to_string(),
                body: "docs index for GET".to_string()
            }
        );
    }

    #[test]
    fn test_render_non_template_is_static() {
        let f = fixture(&[("src/css/site.css", "body {}"), ("lang/fr.json", "{}")]);
        let site = Site::open(f.config.clone()).unwrap();

        let rendered = site.render(&PageRequest::get("/fr/css/site.css")).unwrap();

        assert_eq!(
            rendered,
            Rendered::Static(f.config.source_dir.join("css/site.css"))
        );
    }

    #[test]
    fn test_render_directory_without_slash_redirects() {
        let f = fixture(&[("src/docs/index.html", "docs"), ("lang/fr.json", "{}")]);
        let site = Site::open(f.config.clone()).unwrap();

        assert_eq!(
            site.render(&PageRequest::get("/docs")).unwrap(),
            Rendered::Redirect("/docs/".to_string())
        );
        assert_eq!(
            site.render(&PageRequest::get("/fr")).unwrap(),
            Rendered::Redirect("/fr/".to_string())
        );

        let with_query = PageRequest {
            query: Some("page=2".to_string()),
            ..PageRequest::get("/fr/docs")
        };
        assert_eq!(
            site.render(&with_query).unwrap(),
            Rendered::Redirect("/fr/docs/?page=2".to_string())
        );
    }

    #[test]
    fn test_render_keeps_good_translations_when_a_file_is_broken() {
        let f = fixture(&[
            ("src/index.html", "{{ s(key=\"title\") }}"),
            ("lang/en.json", r#"{"title": "Welcome"}"#),
            ("lang/fr.json", "{broken"),
        ]);
        let site = Site::open(f.config.clone()).unwrap();

        let body = page_body(site.render(&PageRequest::get("/")).unwrap());

        assert_eq!(body, "Welcome");
        assert_eq!(
            fs::read_to_string(f.config.lang_dir.join("en.json")).unwrap(),
            r#"{"title": "Welcome"}"#
        );
        assert_eq!(
            fs::read_to_string(f.config.lang_dir.join("fr.json")).unwrap(),
            "{broken"
        );
    }

    #[test]
    fn test_render_unknown_route_is_not_found() {
        let f = fixture(&[("src/index.html", "home")]);
        let site = Site::open(f.config.clone()).unwrap();

        let err = site.render(&PageRequest::get("/nope.html")).unwrap_err();

        assert!(matches!(err, RenderError::Route(RouteError::NotFound(_))));
    }

    #[test]
    fn test_render_template_error_carries_detail() {
        let f = fixture(&[("src/index.html", "{{ missing_variable }}")]);
        let site = Site::open(f.config.clone()).unwrap();

        let err = site.render(&PageRequest::get("/")).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("index.html"));
        assert!(message.contains("missing_variable"));
    }

    #[test]
    fn test_render_flushes_backfilled_translations() {
        let f = fixture(&[
            ("src/index.html", "{{ s(key=\"hello\") }}"),
            ("lang/en.json", "{}"),
        ]);
        let site = Site::open(f.config.clone()).unwrap();

        let body = page_body(site.render(&PageRequest::get("/")).unwrap());

        assert_eq!(body, "Hello");
        let written = fs::read_to_string(f.config.lang_dir.join("en.json")).unwrap();
        assert!(written.contains("\"hello\": \"Hello\""));
        assert!(!site.store().is_dirty());
    }

    #[test]
    fn test_render_without_persistence_leaves_files_alone() {
        let f = fixture(&[
            ("src/index.html", "{{ s(key=\"hello\") }}"),
            ("lang/en.json", "{}"),
        ]);
        let site = Site::open(f.config.clone())
            .unwrap()
            .without_translation_persistence();

        site.render(&PageRequest::get("/")).unwrap();

        let on_disk = fs::read_to_string(f.config.lang_dir.join("en.json")).unwrap();
        assert_eq!(on_disk, "{}");
        assert!(site.store().is_dirty());
    }

    #[test]
    fn test_render_picks_up_new_language_file() {
        let f = fixture(&[("src/index.html", "{{ lang }}"), ("lang/en.json", "{}")]);
        let site = Site::open(f.config.clone()).unwrap();
        assert!(site.render(&PageRequest::get("/de/")).is_err());

        fs::write(f.config.lang_dir.join("de.json"), "{}").unwrap();

        assert_eq!(page_body(site.render(&PageRequest::get("/de/")).unwrap()), "de");
    }

    // ==================== Startup Tests ====================

    #[test]
    fn test_open_strict_rejects_broken_language_file() {
        let mut f = fixture(&[("lang/en.json", "not json")]);
        f.config.strict_lang = true;

        assert!(matches!(
            Site::open(f.config.clone()),
            Err(RenderError::Store(StoreError::Load { .. }))
        ));
    }

    #[test]
    fn test_open_lenient_tolerates_broken_language_file() {
        let f = fixture(&[("lang/en.json", "not json")]);
        assert!(Site::open(f.config.clone()).is_ok());
    }

    #[test]
    fn test_open_rejects_ambiguous_dynamic_routes() {
        let f = fixture(&[("src/[a].html", "a"), ("src/[b].html", "b")]);

        assert!(matches!(
            Site::open(f.config.clone()),
            Err(RenderError::Route(RouteError::AmbiguousDynamic { .. }))
        ));
    }
}
