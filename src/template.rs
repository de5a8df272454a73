//! Template loading and the functions templates can call.
//!
//! Every file under the source root with a template extension is registered
//! with Tera under its `/`-separated path relative to the root, so templates
//! can `{% extends %}` and `{% include %}` each other by that name.
//!
//! Functions available to templates:
//!
//! | Function | Result |
//! |----------|--------|
//! | `s(key=...)` | Translation of `key` in the request language |
//! | `abs_path_of(path=...)` | `path` prefixed with the request's language segment |
//! | `rel_path(path=...)` | `path` without its language segment |
//! | `md_to_html(file=...)` | Markdown file rendered to HTML (not escaped) |
//! | `load_md_list(dir=...)` | `[{filename, title}]` for every `*.md` in `dir` |
//!
//! Prefix/suffix checks and trimming use Tera's own `starting_with` /
//! `ending_with` tests and `trim_start_matches` / `trim_end_matches` filters.

use crate::i18n::{self, TranslationStore};
use crate::markdown;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tera::{Function, Tera, Value};
use walkdir::WalkDir;

/// Request-specific data the template functions close over
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub store: Arc<TranslationStore>,
    pub lang: String,
    pub lang_prefix: Option<String>,
}

/// `/`-separated name of `path` relative to `root`, as used for template names
pub fn template_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.iter().map(|c| c.to_str()).collect();
    Some(parts?.join("/"))
}

/// Parse every template file under `root` into a fresh Tera instance
pub fn load(root: &Path, is_template: impl Fn(&str) -> bool) -> Result<Tera, tera::Error> {
    let mut sources = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| tera::Error::msg(e.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = template_name(root, entry.path()) else {
            continue;
        };
        if !is_template(&name) {
            continue;
        }
        let content = fs::read_to_string(entry.path())
            .map_err(|e| tera::Error::chain(format!("failed to read {}", name), e))?;
        sources.push((name, content));
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(sources)?;
    Ok(tera)
}

/// Install the per-request functions
pub fn register_functions(tera: &mut Tera, scope: RequestScope) {
    let store = Arc::clone(&scope.store);
    let lang = scope.lang.clone();
    tera.register_function(
        "s",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = string_arg(args, "s", "key")?;
            Ok(Value::String(store.lookup(&lang, key)))
        },
    );

    let prefix = scope.lang_prefix.clone();
    tera.register_function(
        "abs_path_of",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = string_arg(args, "abs_path_of", "path")?;
            Ok(Value::String(i18n::abs_path_of(prefix.as_deref(), path)))
        },
    );

    let store = Arc::clone(&scope.store);
    tera.register_function(
        "rel_path",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = string_arg(args, "rel_path", "path")?;
            Ok(Value::String(i18n::rel_path(path, &store.languages())))
        },
    );

    tera.register_function("md_to_html", MdToHtml);

    tera.register_function(
        "load_md_list",
        |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let dir = string_arg(args, "load_md_list", "dir")?;
            Ok(tera::to_value(markdown::load_md_list(Path::new(dir)))?)
        },
    );
}

/// Renders a markdown file; the output is HTML and must not be escaped again
struct MdToHtml;

impl Function for MdToHtml {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let file = string_arg(args, "md_to_html", "file")?;
        Ok(Value::String(markdown::file_to_html(Path::new(file))))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

fn string_arg<'a>(
    args: &'a HashMap<String, Value>,
    function: &str,
    name: &str,
) -> tera::Result<&'a str> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(tera::Error::msg(format!(
            "`{}` expects `{}` to be a string, got {}",
            function, name, other
        ))),
        None => Err(tera::Error::msg(format!(
            "`{}` is missing the `{}` argument",
            function, name
        ))),
    }
}
