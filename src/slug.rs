use std::sync::OnceLock;

use regex::Regex;

use crate::contract::Article;

const FALLBACK_TITLE: &str = "Untitled";
const MAX_SLUG_BYTES: usize = 100;

/// Human-readable document title: title, then site name, then a placeholder.
pub fn document_title(article: &Article) -> String {
    document_title_or(article, FALLBACK_TITLE)
}

/// [`document_title`] with a caller-chosen placeholder.
pub fn document_title_or(article: &Article, fallback: &str) -> String {
    [&article.title, &article.site_name]
        .into_iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn unsafe_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // path separators, shell/Windows-hostile characters, control characters and whitespace
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1F\s]+"#).expect("static regex"))
}

/// Filesystem-safe file stem derived from [`document_title`]. Never empty.
pub fn slug(article: &Article) -> String {
    let title = document_title(article);
    let replaced = unsafe_runs().replace_all(&title, "-");
    let trimmed = replaced.trim_matches(|c| c == '-' || c == '.');

    let mut end = trimmed.len().min(MAX_SLUG_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    let cut = trimmed[..end].trim_end_matches(|c| c == '-' || c == '.');

    if cut.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        cut.to_string()
    }
}
