//! M3U playlist synthesis from stored channels

use crate::models::Channel;

pub const CONTENT_TYPE: &str = "application/vnd.apple.mpegurl; charset=utf-8";

/// Serialize channels, in the given order, as an `#EXTM3U` playlist.
///
/// Each channel becomes an `#EXTINF:-1` line followed by its stream URL.
/// Unlike the parser, no placeholder name is substituted.
pub fn write_m3u(channels: &[Channel]) -> String {
    let mut out = String::with_capacity(16 + channels.len() * 128);
    out.push_str("#EXTM3U\n");

    for ch in channels {
        let name = if ch.name.is_empty() { &ch.tvg_name } else { &ch.name };

        out.push_str("#EXTINF:-1");
        for (key, value) in [
            ("tvg-id", &ch.tvg_id),
            ("tvg-name", &ch.tvg_name),
            ("tvg-logo", &ch.tvg_logo),
            ("group-title", &ch.group_title),
        ] {
            if !value.is_empty() {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&strip_quotes(value));
                out.push('"');
            }
        }
        out.push(',');
        out.push_str(name);
        out.push('\n');
        out.push_str(&ch.stream_url);
        out.push('\n');
    }

    out
}

/// Attribute values cannot carry `"`; they are dropped rather than escaped
fn strip_quotes(value: &str) -> String {
    value.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::m3u_parser::parse_m3u;

    fn channel(name: &str, url: &str) -> Channel {
        Channel {
            id: 0,
            name: name.to_string(),
            stream_url: url.to_string(),
            tvg_id: String::new(),
            tvg_name: String::new(),
            tvg_logo: String::new(),
            group_title: String::new(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_empty_playlist_is_header_only() {
        assert_eq!(write_m3u(&[]), "#EXTM3U\n");
    }

    #[test]
    fn test_attribute_order_and_omission() {
        let mut ch = channel("CNN", "http://x/cnn");
        ch.group_title = "News".to_string();
        ch.tvg_id = "1".to_string();

        let out = write_m3u(&[ch]);
        assert_eq!(out, "#EXTM3U\n#EXTINF:-1 tvg-id=\"1\" group-title=\"News\",CNN\nhttp://x/cnn\n");
    }

    #[test]
    fn test_all_attributes() {
        let mut ch = channel("One", "http://x/1");
        ch.tvg_id = "id1".to_string();
        ch.tvg_name = "Tvg One".to_string();
        ch.tvg_logo = "http://img/1.png".to_string();
        ch.group_title = "G".to_string();

        let out = write_m3u(&[ch]);
        assert!(out.contains(
            "#EXTINF:-1 tvg-id=\"id1\" tvg-name=\"Tvg One\" tvg-logo=\"http://img/1.png\" group-title=\"G\",One\n"
        ));
    }

    #[test]
    fn test_no_attributes() {
        let out = write_m3u(&[channel("Bare", "http://x/bare")]);
        assert_eq!(out, "#EXTM3U\n#EXTINF:-1,Bare\nhttp://x/bare\n");
    }

    #[test]
    fn test_name_falls_back_to_tvg_name_only() {
        let mut a = channel("", "http://x/a");
        a.tvg_name = "From Tvg".to_string();
        let b = channel("", "http://x/b");

        let out = write_m3u(&[a, b]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "#EXTINF:-1 tvg-name=\"From Tvg\",From Tvg");
        assert_eq!(lines[3], "#EXTINF:-1,");
        assert_eq!(lines[4], "http://x/b");
    }

    #[test]
    fn test_quotes_stripped_from_attributes() {
        let mut ch = channel("Say \"Hi\"", "http://x/q");
        ch.group_title = "The \"Best\"".to_string();

        let out = write_m3u(&[ch]);
        assert!(out.contains("group-title=\"The Best\""));
        // display name is not an attribute and is written as-is
        assert!(out.contains(",Say \"Hi\"\n"));
    }

    #[test]
    fn test_order_preserved() {
        let out = write_m3u(&[channel("B", "http://x/b"), channel("A", "http://x/a")]);
        let urls: Vec<&str> = out.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(urls, vec!["http://x/b", "http://x/a"]);
    }

    #[test]
    fn test_round_trip_through_parser() {
        let source = r#"#EXTM3U
#EXTINF:-1 tvg-id="cnn" tvg-name="CNN Intl" tvg-logo="http://img/cnn.png" group-title="News",CNN
http://example.com/cnn.ts
#EXTGRP:Sports
#EXTINF:-1 tvg-id="espn",ESPN
http://example.com/espn.ts
#EXTINF:-1,Plain http://example.com/plain.ts
"#;
        let parsed = parse_m3u(source);
        let channels: Vec<Channel> = parsed
            .iter()
            .enumerate()
            .map(|(i, p)| Channel {
                id: i as i64 + 1,
                name: p.name.clone(),
                stream_url: p.stream_url.clone(),
                tvg_id: p.tvg_id.clone(),
                tvg_name: p.tvg_name.clone(),
                tvg_logo: p.tvg_logo.clone(),
                group_title: p.group_title.clone(),
                created_at: String::new(),
            })
            .collect();

        let reparsed = parse_m3u(&write_m3u(&channels));
        assert_eq!(reparsed, parsed);
        assert_eq!(reparsed[1].group_title, "Sports");
    }
}
