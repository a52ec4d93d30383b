use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Keep at most this many image candidates per page.
const MAX_IMAGE_CANDIDATES: usize = 3;
const PRICING_IMAGE_KEYWORDS: &[&str] = &[
    "cennik", "price", "pricing", "menu-zabieg", "oferta", "karnety", "tariff",
];

static DROPPED: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("head, script, style, noscript, svg, template, iframe").unwrap()
});
static IMAGE_SOURCES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src], [style]").unwrap());
static BACKGROUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)background(?:-image)?\s*:[^;]*?url\(\s*["']?([^"')]+)["']?\s*\)"#).unwrap()
});
static MD_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static MD_STRONG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__").unwrap());
static MD_EMPHASIS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(^|[\s(])(?:\*([^*\s][^*\n]*?)\*|_([^_\s][^_\n]*?)_)").unwrap()
});
static MD_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([\\`*_{}\[\]()#+\-.!|>~=])").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Render markup as line-oriented text (headings, list bullets and table
/// rows survive; links, images and emphasis are reduced to their text),
/// capped at `max_chars` characters (the prefix is kept).
pub fn normalize(html: &str, max_chars: usize) -> String {
    let mut document = Html::parse_document(html);
    let dropped: Vec<_> = document.select(&DROPPED).map(|el| el.id()).collect();
    for id in dropped {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let cleaned = document.root_element().html();
    let markdown = htmd::convert(&cleaned)
        .unwrap_or_else(|_| document.root_element().text().collect::<Vec<_>>().join("\n"));

    let markdown = strip_inline_markup(&markdown);

    let lines: Vec<String> = markdown
        .lines()
        .map(|line| SPACES_RE.replace_all(line, " ").trim().to_string())
        .collect();
    let text = BLANKS_RE.replace_all(lines.join("\n").trim(), "\n\n").into_owned();

    truncate_chars(text, max_chars)
}

fn strip_inline_markup(markdown: &str) -> String {
    let text = MD_IMAGE_RE.replace_all(markdown, "");
    let text = MD_LINK_RE.replace_all(&text, "$1");
    let text = MD_STRONG_RE.replace_all(&text, "$1$2");
    let text = MD_EMPHASIS_RE.replace_all(&text, "$1$2$3");
    MD_ESCAPE_RE.replace_all(&text, "$1").into_owned()
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Absolute URLs of images on the page whose path looks price-related, in
/// document order, deduplicated, at most three. Covers `<img src>` and
/// inline `background-image` styles.
pub fn extract_candidate_images(html: &str, page_url: &str) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);

    let mut refs = Vec::new();
    for el in document.select(&IMAGE_SOURCES) {
        let el = el.value();
        if el.name() == "img" {
            if let Some(src) = el.attr("src") {
                refs.push(src.trim().to_string());
            }
        }
        if let Some(style) = el.attr("style") {
            refs.extend(BACKGROUND_RE.captures_iter(style).map(|c| c[1].trim().to_string()));
        }
    }

    let mut seen = HashSet::new();
    refs.iter()
        .filter_map(|raw| resolve(base.as_ref(), raw))
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| seen.insert(url.to_string()))
        .filter(|url| is_pricing_path(url.path()))
        .map(|url| url.to_string())
        .take(MAX_IMAGE_CANDIDATES)
        .collect()
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<Url> {
    match base {
        Some(base) => base.join(raw).ok(),
        None => Url::parse(raw).ok(),
    }
}

fn is_pricing_path(path: &str) -> bool {
    let path = path.to_lowercase();
    PRICING_IMAGE_KEYWORDS.iter().any(|k| path.contains(k))
}
