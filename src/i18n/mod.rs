//! Internationalization (i18n) for rendered pages.
//!
//! # Architecture
//!
//! - `store`: On-disk language dictionaries with lookup, autosync backfill and flush
//! - `negotiate`: Picks the request language from the first URL path segment
//!
//! # Example
//!
//! ```rust,ignore
//! use dirsite::i18n::{identify_language, TranslationStore};
//!
//! let store = TranslationStore::new("lang", "en", true);
//! store.load()?;
//!
//! let negotiation = identify_language("/fr/about.html", &store.languages(), "en");
//! let title = store.lookup(&negotiation.lang, "about us");
//! store.flush()?;
//! ```

mod negotiate;
mod store;

pub use negotiate::{abs_path_of, identify_language, rel_path, Negotiation};
pub use store::{default_text, Dictionary, StoreError, TranslationStore};
