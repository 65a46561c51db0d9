use std::sync::LazyLock;

use ammonia;
use regex::Regex;

static YOUTUBE_WATCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtube\.com/watch\?v=([a-zA-Z0-9_-]+)").expect("valid regex"));
static YOUTUBE_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtu\.be/([a-zA-Z0-9_-]+)").expect("valid regex"));

/// Clean teacher-authored HTML (lesson content, descriptions) with ammonia.
///
/// Whitelist based: formatting tags like <b>, <p>, <ul> survive, while
/// <script>, <iframe> and event-handler attributes are stripped.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Converts a YouTube watch or short link into its embeddable form.
/// Other URLs (including ones already in embed form) pass through unchanged.
pub fn video_embed_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    if let Some(caps) = YOUTUBE_WATCH.captures(url).or_else(|| YOUTUBE_SHORT.captures(url)) {
        return format!("https://www.youtube.com/embed/{}", &caps[1]);
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_removed() {
        let cleaned = clean_html("<p>Hello</p><script>alert(1)</script>");
        assert_eq!(cleaned, "<p>Hello</p>");
    }

    #[test]
    fn watch_and_short_links_become_embeds() {
        assert_eq!(
            video_embed_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            "https://www.youtube.com/embed/dQw4w9WgXcQ"
        );
        assert_eq!(
            video_embed_url("https://youtu.be/dQw4w9WgXcQ"),
            "https://www.youtube.com/embed/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn other_urls_pass_through() {
        let embed = "https://www.youtube.com/embed/abc";
        assert_eq!(video_embed_url(embed), embed);
        assert_eq!(video_embed_url("https://vimeo.com/1"), "https://vimeo.com/1");
        assert_eq!(video_embed_url(""), "");
    }
}
