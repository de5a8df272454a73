//! Language negotiation from the first URL path segment.
//!
//! `/fr/about.html` is served in French when `fr` is a known language, and
//! everything else falls back to the configured default. The known set is
//! passed in on every call because autosync can add languages while the
//! server is running.

/// Outcome of [`identify_language`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Active language code
    pub lang: String,
    /// Request path with the language prefix removed (always starts with `/`)
    pub remainder: String,
    /// The language segment found in the path, if any
    pub prefix: Option<String>,
}

/// First non-empty `/`-separated segment of `path`
fn first_segment(path: &str) -> Option<&str> {
    path.split('/').find(|s| !s.is_empty())
}

/// Split a request path into its language and the path that remains.
///
/// # Arguments
/// * `path` - URL path, e.g. `/fr/about.html`
/// * `known` - language codes currently present in the translation store
/// * `default_lang` - language used when the path has no known prefix
pub fn identify_language(path: &str, known: &[String], default_lang: &str) -> Negotiation {
    if let Some(segment) = first_segment(path) {
        if known.iter().any(|lang| lang == segment) {
            return Negotiation {
                lang: segment.to_string(),
                remainder: strip_segment(path, segment),
                prefix: Some(segment.to_string()),
            };
        }
    }

    Negotiation {
        lang: default_lang.to_string(),
        remainder: path.to_string(),
        prefix: None,
    }
}

/// The URL path without its language prefix (`/fr/docs/` → `/docs/`).
/// Paths without a known prefix are returned unchanged.
pub fn rel_path(path: &str, known: &[String]) -> String {
    match first_segment(path) {
        Some(segment) if known.iter().any(|lang| lang == segment) => strip_segment(path, segment),
        _ => path.to_string(),
    }
}

/// Site-absolute link for the current language: `/about.html` becomes
/// `/fr/about.html` when the request came in under `/fr`.
pub fn abs_path_of(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(lang) => format!("/{}{}", lang, path),
        None => path.to_string(),
    }
}

fn strip_segment(path: &str, segment: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let rest = &trimmed[segment.len()..];
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}
