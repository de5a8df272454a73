//! dirsite: a site whose routes are its source directory.
//!
//! # Module map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Runtime settings shared by `run` and `export` |
//! | [`i18n`] | Language files on disk, lookup with backfill, URL prefix negotiation |
//! | [`route`] | URL path → template file, including `[param]` segments |
//! | [`template`] | Tera loading and the per-request template functions |
//! | [`markdown`] | Markdown helpers behind `md_to_html` and `load_md_list` |
//! | [`render`] | One request through language, route, template and flush |
//! | [`server`] | axum router and graceful serve loop |
//! | [`minify`] | HTML, CSS and JS minification for exported files |
//! | [`export`] | Crawl a local server into a static output directory |

pub mod config;
pub mod export;
pub mod i18n;
pub mod markdown;
pub mod minify;
pub mod render;
pub mod route;
pub mod server;
pub mod template;
