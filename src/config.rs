use anyhow::{bail, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    // Content
    pub source_dir: PathBuf,
    pub out_dir: PathBuf,
    pub lang_dir: PathBuf,

    // Templates (extensions always carry a leading dot, e.g. ".html")
    pub template_exts: Vec<String>,

    // Translations
    pub default_lang: String,
    pub lang_auto_sync: bool,
    pub strict_lang: bool,

    // Server
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            out_dir: PathBuf::from("docs"),
            lang_dir: PathBuf::from("lang"),
            template_exts: vec![".html".to_string()],
            default_lang: "en".to_string(),
            lang_auto_sync: true,
            strict_lang: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Parse a comma-separated extension list ("html,.xml, txt") into
    /// dotted extensions. Empty items are dropped; an empty list falls back
    /// to ".html".
    pub fn parse_extensions(raw: &str) -> Vec<String> {
        let exts: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty() && *e != ".")
            .map(|e| {
                if e.starts_with('.') {
                    e.to_string()
                } else {
                    format!(".{}", e)
                }
            })
            .collect();

        if exts.is_empty() {
            vec![".html".to_string()]
        } else {
            exts
        }
    }

    /// Whether `ext` (with leading dot) is rendered through the template engine
    pub fn is_template_ext(&self, ext: &str) -> bool {
        self.template_exts.iter().any(|e| e == ext)
    }

    /// Whether the file name at `path` ends in a template extension
    pub fn is_template_path(&self, path: &str) -> bool {
        match extension_of(path) {
            Some(ext) => self.is_template_ext(ext),
            None => false,
        }
    }

    /// Reject configurations that cannot work at all
    pub fn validate(&self) -> Result<()> {
        if self.default_lang.trim().is_empty() {
            bail!("default language must not be empty");
        }
        if self.default_lang.contains('/') {
            bail!("default language '{}' must not contain '/'", self.default_lang);
        }
        if self.template_exts.is_empty() {
            bail!("at least one template extension is required");
        }
        Ok(())
    }
}

/// Extension of the last path component including the dot (".html").
/// Dotfiles such as ".env" have no extension.
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx..]),
    }
}
