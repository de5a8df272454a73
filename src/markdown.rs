//! Markdown helpers exposed to templates.

use pulldown_cmark::{html as md_html, CowStr, Event, Options, Parser, Tag, TagEnd};
use pulldown_cmark_escape::{escape_href, escape_html};
use serde::Serialize;
use std::collections::hash_map::{Entry, HashMap};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Entry of a markdown listing (see [`load_md_list`])
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MdEntry {
    /// File name without the `.md` extension
    pub filename: String,
    /// First line of the file with a leading `# ` removed
    pub title: String,
}

/// Render markdown to HTML. Links open in a new tab and headings without an
/// explicit `{#id}` get one derived from their text.
pub fn to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES;

    let events: Vec<Event> = Parser::new_ext(markdown, options)
        .map(|event| match event {
            Event::Start(Tag::Link {
                dest_url, title, ..
            }) => Event::InlineHtml(open_link_tag(&dest_url, &title)),
            Event::End(TagEnd::Link) => Event::InlineHtml(CowStr::Borrowed("</a>")),
            other => other,
        })
        .collect();

    let mut html = String::new();
    md_html::push_html(&mut html, with_heading_ids(events).into_iter());
    html
}

/// Render a markdown file. A file that cannot be read renders as its error message.
pub fn file_to_html(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(markdown) => to_html(&markdown),
        Err(e) => {
            warn!("Failed to read markdown file {}: {}", path.display(), e);
            e.to_string()
        }
    }
}

/// List the `*.md` files directly inside `dir`, sorted by file name.
///
/// Unreadable files are skipped; an unreadable directory yields an empty list.
pub fn load_md_list(dir: &Path) -> Vec<MdEntry> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list markdown directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut list: Vec<MdEntry> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let filename = name.strip_suffix(".md")?.to_string();
            let content = match fs::read_to_string(entry.path()) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    return None;
                }
            };
            let first_line = content.lines().next().unwrap_or("");
            Some(MdEntry {
                filename,
                title: first_line.strip_prefix("# ").unwrap_or(first_line).to_string(),
            })
        })
        .collect();

    list.sort_by(|a, b| a.filename.cmp(&b.filename));
    list
}

fn open_link_tag(dest_url: &str, title: &str) -> CowStr<'static> {
    // Writing into a String cannot fail.
    let mut tag = String::from("<a href=\"");
    let _ = escape_href(&mut tag, dest_url);
    tag.push('"');
    if !title.is_empty() {
        tag.push_str(" title=\"");
        let _ = escape_html(&mut tag, title);
        tag.push('"');
    }
    tag.push_str(" target=\"_blank\">");
    CowStr::from(tag)
}

/// Give every heading without an id one made from its text. Repeated
/// anchors get `-1`, `-2`, ... appended.
fn with_heading_ids(mut events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    for i in 0..events.len() {
        let Event::Start(Tag::Heading { id, .. }) = &events[i] else {
            continue;
        };
        if let Some(explicit) = id {
            seen.entry(explicit.to_string()).or_insert(0);
            continue;
        }

        let mut text = String::new();
        for event in &events[i + 1..] {
            match event {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(t) | Event::Code(t) => text.push_str(t),
                _ => {}
            }
        }
        let anchor = anchor_name(&text);
        if anchor.is_empty() {
            continue;
        }
        let anchor = match seen.entry(anchor) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += 1;
                format!("{}-{}", entry.key(), entry.get())
            }
            Entry::Vacant(entry) => {
                let anchor = entry.key().clone();
                entry.insert(0);
                anchor
            }
        };

        if let Event::Start(Tag::Heading { id, .. }) = &mut events[i] {
            *id = Some(CowStr::from(anchor));
        }
    }

    events
}

/// Lowercase letters and digits of `text`, other runs collapsed to a single `-`
fn anchor_name(text: &str) -> String {
    let mut anchor = String::new();
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !anchor.is_empty() {
                anchor.push('-');
            }
            pending_dash = false;
            anchor.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    anchor
}
