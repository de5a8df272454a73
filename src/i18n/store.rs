//! Translation store: per-language key → text dictionaries backed by a
//! directory of `<code>.json` files.
//!
//! The store is shared by every request. Lookups that miss may write into the
//! in-memory dictionaries (autosync), and dirty state is flushed back to disk
//! after a successful render. All mutable state sits behind a `Mutex`; flushes
//! are serialized by a second lock and write a snapshot, so a slow disk never
//! blocks lookups.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key → text mapping for a single language. Sorted so flushed files diff cleanly.
pub type Dictionary = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot load language file {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
    #[error("cannot write language file {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default)]
struct StoreState {
    langs: BTreeMap<String, Dictionary>,
    /// Keys backfilled since the last successful flush, per language
    pending: BTreeMap<String, BTreeSet<String>>,
    /// Languages whose file exists but could not be read; never written back
    unreadable: BTreeSet<String>,
    dirty: bool,
}

/// Result of reading the language directory once
#[derive(Debug, Default)]
struct DiskScan {
    dictionaries: BTreeMap<String, Dictionary>,
    failures: Vec<(String, StoreError)>,
}

#[derive(Debug)]
pub struct TranslationStore {
    dir: PathBuf,
    default_lang: String,
    auto_sync: bool,
    state: Mutex<StoreState>,
    flush_lock: Mutex<()>,
}

impl TranslationStore {
    /// Create an empty store for `dir`. Nothing is read until [`load`](Self::load).
    pub fn new(dir: impl Into<PathBuf>, default_lang: impl Into<String>, auto_sync: bool) -> Self {
        Self {
            dir: dir.into(),
            default_lang: default_lang.into(),
            auto_sync,
            state: Mutex::new(StoreState::default()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_lang(&self) -> &str {
        &self.default_lang
    }

    /// Read every `*.json` dictionary in the language directory.
    ///
    /// A missing directory (or a path that is not a directory) is not an
    /// error: the store simply stays as it is. Otherwise the directory is the
    /// source of truth for which languages exist:
    ///
    /// - values read from disk replace in-memory values for the same key;
    /// - keys backfilled since the last flush are kept on top of them;
    /// - a language whose file disappeared is dropped, unless it has such
    ///   unflushed keys.
    ///
    /// A file that cannot be read or parsed does not stop the others from
    /// loading. Its language keeps its in-memory state and is excluded from
    /// [`flush`](Self::flush) until it loads again; the first such failure is
    /// returned after everything readable has been merged.
    ///
    /// # Returns
    /// The number of dictionary files read.
    pub fn load(&self) -> Result<usize, StoreError> {
        let Some(scan) = read_dictionaries(&self.dir)? else {
            return Ok(0);
        };
        let count = scan.dictionaries.len();

        {
            let mut state = self.lock_state();
            let StoreState {
                langs,
                pending,
                unreadable,
                ..
            } = &mut *state;

            *unreadable = scan.failures.iter().map(|(lang, _)| lang.clone()).collect();

            let mut merged = BTreeMap::new();
            for (lang, mut dictionary) in scan.dictionaries {
                if let (Some(keys), Some(current)) = (pending.get(&lang), langs.get(&lang)) {
                    for key in keys {
                        if let Some(text) = current.get(key) {
                            dictionary.entry(key.clone()).or_insert_with(|| text.clone());
                        }
                    }
                }
                merged.insert(lang, dictionary);
            }

            for (lang, current) in std::mem::take(langs) {
                if merged.contains_key(&lang) {
                    continue;
                }
                if unreadable.contains(&lang) {
                    merged.insert(lang, current);
                    continue;
                }
                let unflushed: Dictionary = pending
                    .get(&lang)
                    .map(|keys| {
                        current
                            .iter()
                            .filter(|(key, _)| keys.contains(*key))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                if unflushed.is_empty() {
                    debug!("Language file for {} is gone, forgetting it", lang);
                } else {
                    merged.insert(lang, unflushed);
                }
            }

            pending.retain(|lang, _| merged.contains_key(lang));
            *langs = merged;
        }

        let mut failures = scan.failures.into_iter().map(|(_, e)| e);
        match failures.next() {
            Some(first) => {
                for other in failures {
                    warn!("{}", other);
                }
                Err(first)
            }
            None => Ok(count),
        }
    }

    /// Translate `key` into `lang`.
    ///
    /// On a miss with autosync enabled the generated default text (see
    /// [`default_text`]) is stored under `(lang, key)` and the store becomes
    /// dirty. With autosync disabled, a non-default language borrows the
    /// default language's entry (kept in memory only); failing that the
    /// generated text is returned without being stored.
    pub fn lookup(&self, lang: &str, key: &str) -> String {
        let mut state = self.lock_state();

        if let Some(text) = state.langs.get(lang).and_then(|d| d.get(key)) {
            return text.clone();
        }

        let generated = default_text(key);

        if self.auto_sync {
            debug!("Backfilling translation {}/{} = {:?}", lang, key, generated);
            state
                .langs
                .entry(lang.to_string())
                .or_default()
                .insert(key.to_string(), generated.clone());
            state
                .pending
                .entry(lang.to_string())
                .or_default()
                .insert(key.to_string());
            state.dirty = true;
            return generated;
        }

        if lang != self.default_lang {
            let fallback = state
                .langs
                .get(&self.default_lang)
                .and_then(|d| d.get(key))
                .cloned();
            if let Some(text) = fallback {
                state
                    .langs
                    .entry(lang.to_string())
                    .or_default()
                    .insert(key.to_string(), text.clone());
                return text;
            }
        }

        generated
    }

    /// Write every dictionary back to disk if anything changed since the last flush.
    ///
    /// One file per language, tab-indented JSON, overwriting prior content.
    /// The first I/O failure aborts the remaining writes and leaves the store
    /// dirty so a later flush retries.
    ///
    /// # Returns
    /// `true` if files were written, `false` if the store was clean.
    pub fn flush(&self) -> Result<bool, StoreError> {
        let _flushing = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (snapshot, written_keys) = {
            let mut state = self.lock_state();
            if !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            for lang in &state.unreadable {
                warn!("Not writing {}.json: it could not be loaded", lang);
            }
            let snapshot: BTreeMap<String, Dictionary> = state
                .langs
                .iter()
                .filter(|(lang, _)| !state.unreadable.contains(*lang))
                .map(|(lang, d)| (lang.clone(), d.clone()))
                .collect();
            let written_keys: BTreeMap<String, BTreeSet<String>> = state
                .pending
                .iter()
                .filter(|(lang, _)| snapshot.contains_key(*lang))
                .map(|(lang, keys)| (lang.clone(), keys.clone()))
                .collect();
            (snapshot, written_keys)
        };

        if let Err(e) = write_dictionaries(&self.dir, &snapshot) {
            self.lock_state().dirty = true;
            return Err(e);
        }

        {
            let mut state = self.lock_state();
            for (lang, keys) in written_keys {
                if let Some(pending) = state.pending.get_mut(&lang) {
                    pending.retain(|key| !keys.contains(key));
                }
            }
            state.pending.retain(|_, keys| !keys.is_empty());
        }

        info!(
            "✓ Synced {} language file(s) to {}",
            snapshot.len(),
            self.dir.display()
        );
        Ok(true)
    }

    /// Known language codes, sorted
    pub fn languages(&self) -> Vec<String> {
        self.lock_state().langs.keys().cloned().collect()
    }

    pub fn contains_language(&self, lang: &str) -> bool {
        self.lock_state().langs.contains_key(lang)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    /// Copy of one language's dictionary, if the language is known
    pub fn dictionary(&self, lang: &str) -> Option<Dictionary> {
        self.lock_state().langs.get(lang).cloned()
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Default text for a key nobody has translated yet: the key with its first
/// character upper-cased when that character is an ASCII lowercase letter.
/// Everything else is returned unchanged.
pub fn default_text(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            let mut text = String::with_capacity(key.len());
            text.push(first.to_ascii_uppercase());
            text.push_str(chars.as_str());
            text
        }
        _ => key.to_string(),
    }
}

/// `None` when `dir` is missing or not a directory. Per-file failures are
/// collected instead of aborting the scan.
fn read_dictionaries(dir: &Path) -> Result<Option<DiskScan>, StoreError> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(None),
    }

    let entries = fs::read_dir(dir).map_err(|e| StoreError::Load {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut scan = DiskScan::default();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::Load {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(lang) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_suffix(".json"))
            .map(str::to_string)
        else {
            continue;
        };

        match read_dictionary(&path) {
            Ok(dictionary) => {
                scan.dictionaries.insert(lang, dictionary);
            }
            Err(e) => scan.failures.push((lang, e)),
        }
    }

    Ok(Some(scan))
}

fn read_dictionary(path: &Path) -> Result<Dictionary, StoreError> {
    let load_error = |reason: String| StoreError::Load {
        path: path.to_path_buf(),
        reason,
    };
    let content = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| load_error(e.to_string()))
}

fn write_dictionaries(dir: &Path, langs: &BTreeMap<String, Dictionary>) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|source| StoreError::Persist {
        path: dir.to_path_buf(),
        source,
    })?;

    for (lang, dictionary) in langs {
        let path = dir.join(format!("{}.json", lang));
        let bytes = to_pretty_json(dictionary).map_err(|source| StoreError::Persist {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| StoreError::Persist { path, source })?;
    }
    Ok(())
}

fn to_pretty_json(dictionary: &Dictionary) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    dictionary.serialize(&mut serializer).map_err(io::Error::other)?;
    buf.push(b'\n');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    fn lang_dir(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        for (name, content) in files {
            fs::write(temp_dir.path().join(name), content).expect("Failed to write lang file");
        }
        temp_dir
    }

    fn loaded_store(temp_dir: &TempDir, auto_sync: bool) -> TranslationStore {
        let store = TranslationStore::new(temp_dir.path(), "en", auto_sync);
        store.load().expect("Should load");
        store
    }

    // ==================== Default Text Tests ====================

    #[test]
    fn test_default_text_uppercases_first_letter() {
        assert_eq!(default_text("hello world"), "Hello world");
        assert_eq!(default_text("aboutUs"), "AboutUs");
    }

    #[test]
    fn test_default_text_leaves_other_keys_unchanged() {
        assert_eq!(default_text("Hello"), "Hello");
        assert_eq!(default_text("42 apples"), "42 apples");
        assert_eq!(default_text("élan"), "élan");
        assert_eq!(default_text(""), "");
    }

    proptest! {
        #[test]
        fn prop_default_text_only_touches_first_char(first in "[a-z]", rest in ".{0,20}") {
            let key = format!("{}{}", first, rest);
            let text = default_text(&key);
            prop_assert_eq!(&text[..1], first.to_ascii_uppercase());
            prop_assert_eq!(&text[1..], rest.as_str());
        }

        #[test]
        fn prop_default_text_identity_without_lowercase_start(key in "[A-Z0-9 _.-][a-zA-Z0-9 ]{0,20}") {
            prop_assert_eq!(default_text(&key), key);
        }
    }

    // ==================== Load Tests ====================

    #[test]
    fn test_load_missing_dir_is_noop() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = TranslationStore::new(temp_dir.path().join("nope"), "en", true);

        assert_eq!(store.load().expect("Missing dir is not an error"), 0);
        assert!(store.languages().is_empty());
    }

    #[test]
    fn test_load_path_that_is_a_file_is_noop() {
        let temp_dir = lang_dir(&[("lang", "not a dir")]);
        let store = TranslationStore::new(temp_dir.path().join("lang"), "en", true);

        assert_eq!(store.load().expect("File path is not an error"), 0);
    }

    #[test]
    fn test_load_reads_json_files_by_stem() {
        let temp_dir = lang_dir(&[
            ("en.json", r#"{"hello": "Hello there"}"#),
            ("fr.json", r#"{"hello": "Bonjour"}"#),
            ("notes.txt", "ignored"),
        ]);
        let store = loaded_store(&temp_dir, true);

        assert_eq!(store.languages(), vec!["en".to_string(), "fr".to_string()]);
        assert!(store.contains_language("fr"));
        assert!(!store.contains_language("notes"));
        assert_eq!(store.lookup("fr", "hello"), "Bonjour");
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let temp_dir = lang_dir(&[("en.json", "{not json")]);
        let store = TranslationStore::new(temp_dir.path(), "en", true);

        let err = store.load().expect_err("Invalid JSON should fail");
        assert!(matches!(err, StoreError::Load { .. }));
        assert!(err.to_string().contains("en.json"));
    }

    #[test]
    fn test_load_rejects_nested_values() {
        let temp_dir = lang_dir(&[("en.json", r#"{"menu": {"home": "Home"}}"#)]);
        let store = TranslationStore::new(temp_dir.path(), "en", true);

        assert!(matches!(store.load(), Err(StoreError::Load { .. })));
    }

    #[test]
    fn test_load_keeps_readable_files_when_one_is_broken() {
        let temp_dir = lang_dir(&[
            ("de.json", "{broken"),
            ("en.json", r#"{"title": "Welcome"}"#),
            ("fr.json", r#"{"title": "Bienvenue"}"#),
        ]);
        let store = TranslationStore::new(temp_dir.path(), "en", true);

        let err = store.load().expect_err("Broken file is still reported");

        assert!(err.to_string().contains("de.json"));
        assert_eq!(store.languages(), vec!["en".to_string(), "fr".to_string()]);
        assert_eq!(store.lookup("en", "title"), "Welcome");
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_reload_forgets_deleted_language() {
        let temp_dir = lang_dir(&[("en.json", "{}"), ("fr.json", r#"{"hello": "Bonjour"}"#)]);
        let store = loaded_store(&temp_dir, true);

        fs::remove_file(temp_dir.path().join("fr.json")).unwrap();
        store.load().expect("Should reload");
        store.lookup("en", "fresh");
        store.flush().expect("Should flush");

        assert_eq!(store.languages(), vec!["en".to_string()]);
        assert!(!temp_dir.path().join("fr.json").exists());
    }

    #[test]
    fn test_reload_keeps_deleted_language_with_unflushed_keys() {
        let temp_dir = lang_dir(&[("en.json", "{}"), ("fr.json", r#"{"hello": "Bonjour"}"#)]);
        let store = loaded_store(&temp_dir, true);
        store.lookup("fr", "fresh");

        fs::remove_file(temp_dir.path().join("fr.json")).unwrap();
        store.load().expect("Should reload");

        let fr = store.dictionary("fr").expect("fr has unflushed keys");
        assert_eq!(fr.get("fresh"), Some(&"Fresh".to_string()));
        assert_eq!(fr.get("hello"), None);
    }

    #[test]
    fn test_reload_after_flush_drops_nothing_on_disk() {
        let temp_dir = lang_dir(&[("en.json", "{}")]);
        let store = loaded_store(&temp_dir, true);
        store.lookup("en", "fresh");
        store.flush().expect("Should flush");

        store.load().expect("Should reload");

        assert_eq!(store.lookup("en", "fresh"), "Fresh");
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_reload_merges_disk_over_memory_and_keeps_backfills() {
        let temp_dir = lang_dir(&[("en.json", r#"{"hello": "Hello"}"#)]);
        let store = loaded_store(&temp_dir, true);
        store.lookup("en", "fresh");

        fs::write(temp_dir.path().join("en.json"), r#"{"hello": "Hi"}"#).unwrap();
        store.load().expect("Should reload");

        assert_eq!(store.lookup("en", "hello"), "Hi");
        assert_eq!(store.lookup("en", "fresh"), "Fresh");
    }

    // ==================== Lookup Tests ====================

    #[test]
    fn test_lookup_existing_entry() {
        let temp_dir = lang_dir(&[("en.json", r#"{"hello": "Hello there"}"#)]);
        let store = loaded_store(&temp_dir, true);

        assert_eq!(store.lookup("en", "hello"), "Hello there");
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_lookup_miss_with_autosync_backfills_and_marks_dirty() {
        let temp_dir = lang_dir(&[("en.json", "{}")]);
        let store = loaded_store(&temp_dir, true);

        assert_eq!(store.lookup("en", "welcome"), "Welcome");
        assert!(store.is_dirty());
        assert_eq!(
            store.dictionary("en").unwrap().get("welcome"),
            Some(&"Welcome".to_string())
        );
    }

    #[test]
    fn test_lookup_miss_with_autosync_creates_language() {
        let temp_dir = TempDir::new().unwrap();
        let store = loaded_store(&temp_dir, true);

        store.lookup("de", "title");

        assert!(store.contains_language("de"));
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let temp_dir = lang_dir(&[("en.json", "{}"), ("fr.json", "{}")]);
        for auto_sync in [true, false] {
            let store = loaded_store(&temp_dir, auto_sync);
            let first = store.lookup("fr", "contact us");
            let second = store.lookup("fr", "contact us");
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_lookup_without_autosync_borrows_default_language() {
        let temp_dir = lang_dir(&[
            ("en.json", r#"{"hello": "Hello there"}"#),
            ("fr.json", "{}"),
        ]);
        let store = loaded_store(&temp_dir, false);

        assert_eq!(store.lookup("fr", "hello"), "Hello there");
        assert_eq!(
            store.dictionary("fr").unwrap().get("hello"),
            Some(&"Hello there".to_string())
        );
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_lookup_without_autosync_does_not_store_generated_text() {
        let temp_dir = lang_dir(&[("en.json", "{}"), ("fr.json", "{}")]);
        let store = loaded_store(&temp_dir, false);

        assert_eq!(store.lookup("fr", "goodbye"), "Goodbye");
        assert_eq!(store.lookup("en", "goodbye"), "Goodbye");
        assert!(store.dictionary("fr").unwrap().is_empty());
        assert!(store.dictionary("en").unwrap().is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_concurrent_lookups_keep_every_backfill() {
        let temp_dir = lang_dir(&[("en.json", "{}")]);
        let store = Arc::new(loaded_store(&temp_dir, true));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.lookup("en", &format!("key-{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.dictionary("en").unwrap().len(), 8 * 50);
    }

    // ==================== Flush Tests ====================

    #[test]
    fn test_flush_clean_store_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = TranslationStore::new(temp_dir.path().join("lang"), "en", true);

        assert!(!store.flush().expect("Should flush"));
        assert!(!temp_dir.path().join("lang").exists());
    }

    #[test]
    fn test_flush_writes_every_language_and_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("lang");
        let store = TranslationStore::new(&dir, "en", true);
        store.lookup("en", "hello");
        store.lookup("fr", "hello");

        assert!(store.flush().expect("Should flush"));
        assert!(!store.is_dirty());

        let written = fs::read_to_string(dir.join("en.json")).unwrap();
        assert!(written.contains("\t\"hello\": \"Hello\""));

        let reloaded = TranslationStore::new(&dir, "en", false);
        reloaded.load().expect("Should load flushed files");
        assert_eq!(reloaded.languages(), vec!["en".to_string(), "fr".to_string()]);
        assert_eq!(reloaded.lookup("fr", "hello"), "Hello");
    }

    #[test]
    fn test_flush_failure_keeps_store_dirty() {
        let temp_dir = lang_dir(&[("lang", "a file, not a directory")]);
        let store = TranslationStore::new(temp_dir.path().join("lang"), "en", true);
        store.lookup("en", "hello");

        let err = store.flush().expect_err("Writing under a file should fail");
        assert!(matches!(err, StoreError::Persist { .. }));
        assert!(store.is_dirty());
    }

    #[test]
    fn test_flush_never_overwrites_unreadable_file() {
        let temp_dir = lang_dir(&[
            ("en.json", r#"{"title": "Welcome"}"#),
            ("fr.json", "{broken"),
        ]);
        let store = TranslationStore::new(temp_dir.path(), "en", true);
        assert!(store.load().is_err());

        store.lookup("en", "subtitle");
        store.lookup("fr", "subtitle");
        assert!(store.flush().expect("Should flush readable languages"));

        assert_eq!(
            fs::read_to_string(temp_dir.path().join("fr.json")).unwrap(),
            "{broken"
        );
        let en = fs::read_to_string(temp_dir.path().join("en.json")).unwrap();
        assert!(en.contains("\"title\": \"Welcome\""));
        assert!(en.contains("\"subtitle\": \"Subtitle\""));
    }

    #[test]
    fn test_unreadable_language_is_written_once_fixed() {
        let temp_dir = lang_dir(&[("en.json", "{}"), ("fr.json", "{broken")]);
        let store = TranslationStore::new(temp_dir.path(), "en", true);
        assert!(store.load().is_err());
        store.lookup("fr", "hello");

        fs::write(temp_dir.path().join("fr.json"), r#"{"bye": "Au revoir"}"#).unwrap();
        store.load().expect("Fixed file should load");
        store.lookup("en", "other");
        store.flush().expect("Should flush");

        let fr = fs::read_to_string(temp_dir.path().join("fr.json")).unwrap();
        assert!(fr.contains("\"bye\": \"Au revoir\""));
        assert!(fr.contains("\"hello\": \"Hello\""));
    }
}
