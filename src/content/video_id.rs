use url::Url;

/// Stable per-video key used to scope notes, chats and summaries.
pub fn video_id_from_url(url: &Url) -> String {
    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "v") {
        return non_empty(&id).unwrap_or("unknown").to_string();
    }

    let host = url.host_str().unwrap_or_default();
    let path = url.path();

    if host == "youtu.be" {
        return non_empty(path.trim_start_matches('/'))
            .unwrap_or("unknown")
            .to_string();
    }
    if let Some(rest) = path.strip_prefix("/embed/") {
        return non_empty(rest.split('/').next().unwrap_or_default())
            .unwrap_or("unknown")
            .to_string();
    }

    non_empty(path)
        .or_else(|| non_empty(host))
        .unwrap_or("unknown-video")
        .to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(url: &str) -> String {
        video_id_from_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn recognises_watch_short_and_embed_urls() {
        assert_eq!(id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42"), "dQw4w9WgXcQ");
        assert_eq!(id("https://youtu.be/dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(id("https://www.youtube.com/embed/abc123/extra"), "abc123");
    }

    #[test]
    fn falls_back_to_path() {
        assert_eq!(id("https://vimeo.com/12345"), "/12345");
        assert_eq!(id("https://example.com/"), "/");
    }
}
