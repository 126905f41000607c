// Reconciles a freshly fetched group with the stored record for the same post.
//
// Operators hand-edit records after ingestion. A later pass keeps those edits,
// fills in fields that are still empty or still carry a placeholder, and
// surfaces links that were not in the description yet.

use channelfeed_common::{ContentRecord, Placeholders};

use crate::grouping::MessageGroup;
use crate::links::{self, Extracted};

/// Titles are cut to this many characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// Merge `group` into `existing` (or build a new record when there is none).
pub fn merge(
    existing: Option<&ContentRecord>,
    group: &MessageGroup,
    placeholders: &Placeholders,
) -> ContentRecord {
    let extracted = links::extract(&group.text, &group.annotations);

    let title = existing
        .map(|r| r.title.as_str())
        .filter(|t| is_filled(t, &placeholders.title))
        .map(str::to_string)
        .unwrap_or_else(|| derive_title(&group.text, placeholders));

    let hashtag_line = existing
        .map(|r| r.hashtag_line.as_str())
        .filter(|h| is_filled(h, &placeholders.hashtag))
        .map(str::to_string)
        .unwrap_or_else(|| derive_hashtag_line(&extracted, placeholders));

    let (primary_image, images) = match existing {
        Some(r) if !needs_gallery(r, placeholders) || group.images.is_empty() => {
            (r.primary_image.clone(), r.images.clone())
        }
        _ => derive_gallery(group, placeholders),
    };

    let base_description = existing
        .map(|r| r.description.as_str())
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(&group.text);
    let description = links::append_missing_links(base_description, &extracted.urls);

    let published_at = existing
        .and_then(|r| r.published_at)
        .unwrap_or(0)
        .max(group.max_timestamp);

    let video_link = existing
        .and_then(|r| r.video_link.clone())
        .filter(|v| !v.trim().is_empty())
        .or_else(|| group.video.clone());

    ContentRecord {
        id: group.record_id(),
        title,
        hashtag_line,
        description,
        link: group.permalink(),
        primary_image,
        images,
        video_link,
        published_at: Some(published_at),
        extra: existing.map(|r| r.extra.clone()).unwrap_or_default(),
    }
}

/// First non-blank line of `text`, cut to [`MAX_TITLE_CHARS`].
pub fn derive_title(text: &str, placeholders: &Placeholders) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string())
        .unwrap_or_else(|| placeholders.title.clone())
}

fn derive_hashtag_line(extracted: &Extracted, placeholders: &Placeholders) -> String {
    if extracted.hashtags.is_empty() {
        placeholders.hashtag.clone()
    } else {
        extracted.hashtags.join(" ")
    }
}

fn derive_gallery(group: &MessageGroup, placeholders: &Placeholders) -> (String, Vec<String>) {
    let primary = group
        .images
        .first()
        .cloned()
        .unwrap_or_else(|| placeholders.image.clone());
    (primary, group.images.clone())
}

/// A stored gallery is replaced only while it is still empty or placeholder.
fn needs_gallery(record: &ContentRecord, placeholders: &Placeholders) -> bool {
    record.images.is_empty()
        || record.primary_image.trim().is_empty()
        || record.primary_image == placeholders.image
}

fn is_filled(value: &str, placeholder: &str) -> bool {
    !value.trim().is_empty() && value != placeholder
}
