// Hashtag and link extraction from post text and its structured annotations.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use channelfeed_common::{AnnotationKind, LinkAnnotation};

/// Links longer than this are dropped outright.
pub const MAX_URL_LEN: usize = 2048;

/// Letters, digits and underscore in any script.
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[\p{L}\p{N}_]+").expect("valid regex"));

/// Explicit schemes plus the two bare forms people actually paste: `www.` and `t.me/`.
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.|t\.me/)[^\s<>"'«»]+"#).expect("valid regex")
});

/// Hashtags and links found in one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub hashtags: Vec<String>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("annotation span {offset}+{length} is outside text of {text_len} UTF-16 units")]
    OutOfRange {
        offset: i64,
        length: i64,
        text_len: usize,
    },

    #[error("annotation span {offset}+{length} splits a surrogate pair")]
    InvalidSpan { offset: i64, length: i64 },
}

/// Extract hashtags and links from `text`.
///
/// Annotation links come first and are trusted as given; regex matches over the
/// raw text follow. If any annotation cannot be resolved against the text, all
/// annotations are ignored and only the regex pass is used.
pub fn extract(text: &str, annotations: &[LinkAnnotation]) -> Extracted {
    let annotated = match annotation_urls(text, annotations) {
        Ok(urls) => urls,
        Err(e) => {
            warn!(error = %e, "Unusable link annotations, falling back to text matching");
            Vec::new()
        }
    };

    let mut seen = HashSet::new();
    let urls = annotated
        .into_iter()
        .chain(text_urls(text))
        .filter_map(|u| {
            let u = u.trim().to_string();
            if u.is_empty() || u.chars().count() > MAX_URL_LEN {
                return None;
            }
            seen.insert(u.clone()).then_some(u)
        })
        .collect();

    Extracted {
        hashtags: extract_hashtags(text),
        urls,
    }
}

/// Extract `#tags` from text. Case is preserved; later tags that differ only
/// by case are dropped.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    HASHTAG_RE
        .find_iter(text)
        .filter_map(|m| {
            let tag = m.as_str();
            seen.insert(tag.to_lowercase()).then(|| tag.to_string())
        })
        .collect()
}

/// Resolve every link annotation against `text`.
pub fn annotation_urls(
    text: &str,
    annotations: &[LinkAnnotation],
) -> Result<Vec<String>, AnnotationError> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut urls = Vec::new();

    for ann in annotations {
        match &ann.kind {
            AnnotationKind::TextLink { url } => urls.push(url.trim().to_string()),
            AnnotationKind::Url => {
                let span = utf16_span(&units, ann.offset, ann.length)?;
                urls.push(normalize_url(&span));
            }
        }
    }

    Ok(urls)
}

fn utf16_span(units: &[u16], offset: i64, length: i64) -> Result<String, AnnotationError> {
    let out_of_range = AnnotationError::OutOfRange {
        offset,
        length,
        text_len: units.len(),
    };
    let start = usize::try_from(offset).map_err(|_| out_of_range.clone())?;
    let len = usize::try_from(length).map_err(|_| out_of_range.clone())?;
    let end = start.checked_add(len).ok_or_else(|| out_of_range.clone())?;
    let slice = units.get(start..end).ok_or(out_of_range)?;
    String::from_utf16(slice).map_err(|_| AnnotationError::InvalidSpan { offset, length })
}

/// Regex pass over raw text, normalized.
fn text_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| normalize_url(trim_trailing_punctuation(m.as_str())))
        .collect()
}

/// Sentence punctuation glued to the end of a link is not part of it. A closing
/// paren is kept when the link itself opened one.
fn trim_trailing_punctuation(raw: &str) -> &str {
    let mut s = raw;
    loop {
        let trimmed = s.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let trimmed = match trimmed.strip_suffix(')') {
            Some(inner) if !inner.contains('(') => inner,
            _ => trimmed,
        };
        if trimmed.len() == s.len() {
            return s;
        }
        s = trimmed;
    }
}

/// Give bare `www.` and `t.me/` links an https scheme.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("www.") || lower.starts_with("t.me/") {
        format!("https://{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Header of the block appended to descriptions.
pub const LINKS_HEADER: &str = "Links:";

/// Append any of `urls` not already present in `description`.
///
/// Returns `description` unchanged when every link already occurs in it.
pub fn append_missing_links(description: &str, urls: &[String]) -> String {
    let mut seen = HashSet::new();
    let missing: Vec<&str> = urls
        .iter()
        .map(|u| u.as_str())
        .filter(|u| !u.is_empty() && !description.contains(u) && seen.insert(*u))
        .collect();

    if missing.is_empty() {
        return description.to_string();
    }

    let block = format!("{LINKS_HEADER}\n{}", missing.join("\n"));
    let body = description.trim_end();
    if body.is_empty() {
        block
    } else {
        format!("{body}\n\n{block}")
    }
}
