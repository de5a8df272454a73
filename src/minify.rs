//! Output minification for exported files, chosen by file extension.

use minify_html::Cfg;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinifyError {
    #[error("{kind} output is not valid UTF-8")]
    Encoding { kind: &'static str },
    #[error("CSS minification failed: {0}")]
    Css(String),
}

/// Minify `bytes` according to `ext` (".html", ".css", ".js").
/// Any other extension is passed through unchanged.
pub fn minify(ext: Option<&str>, bytes: &[u8]) -> Result<Vec<u8>, MinifyError> {
    match ext {
        Some(".html") | Some(".htm") => {
            let mut cfg = Cfg::new();
            cfg.minify_css = true;
            cfg.minify_js = true;
            Ok(minify_html::minify(bytes, &cfg))
        }
        Some(".css") => {
            let source =
                std::str::from_utf8(bytes).map_err(|_| MinifyError::Encoding { kind: "CSS" })?;
            let minified =
                minifier::css::minify(source).map_err(|e| MinifyError::Css(e.to_string()))?;
            Ok(minified.to_string().into_bytes())
        }
        Some(".js") => {
            let source =
                std::str::from_utf8(bytes).map_err(|_| MinifyError::Encoding { kind: "JS" })?;
            Ok(minifier::js::minify(source).to_string().into_bytes())
        }
        _ => Ok(bytes.to_vec()),
    }
}
