//! M3U / M3U8 playlist parser
//!
//! Turns playlist text into an ordered list of [`ParsedItem`]s. Malformed
//! directives never fail the parse: they are skipped or degrade to
//! placeholder names. Only a read failure on the underlying buffer is an error.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::ParsedItem;

const HEADER_MARKER: &str = "#EXTM3U";
const GROUP_MARKER: &str = "#EXTGRP:";
const EXTINF_MARKER: &str = "#EXTINF:";

/// Name used when neither the display name nor `tvg-name` is set
pub const PLACEHOLDER_NAME: &str = "Channel";

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).expect("attribute regex should compile")
    })
}

/// Parse M3U content held in memory
pub fn parse_m3u(content: &str) -> Vec<ParsedItem> {
    let mut parser = M3uParser::new();
    for line in content.lines() {
        parser.feed_line(line);
    }
    parser.finish()
}

/// Parse M3U content from a buffered reader.
///
/// Fails only if the reader does (I/O error or invalid UTF-8).
pub fn parse_reader<R: BufRead>(reader: R) -> std::io::Result<Vec<ParsedItem>> {
    let mut parser = M3uParser::new();
    for line in reader.lines() {
        parser.feed_line(&line?);
    }
    Ok(parser.finish())
}

/// Pending-entry state between an `#EXTINF:` line and its URL line
#[derive(Debug)]
enum ParseState {
    Idle,
    AwaitingUrl(ParsedItem),
}

/// Line-at-a-time parser. The default group is scoped to one parser instance.
#[derive(Debug)]
struct M3uParser {
    state: ParseState,
    default_group: String,
    items: Vec<ParsedItem>,
}

impl M3uParser {
    fn new() -> Self {
        Self {
            state: ParseState::Idle,
            default_group: String::new(),
            items: Vec::new(),
        }
    }

    fn feed_line(&mut self, line: &str) {
        let line = line.trim();

        if line.is_empty() || line.starts_with(HEADER_MARKER) {
            return;
        }

        if let Some(group) = line.strip_prefix(GROUP_MARKER) {
            self.default_group = group.trim().to_string();
            return;
        }

        if let Some(info) = line.strip_prefix(EXTINF_MARKER) {
            let item = parse_extinf(info);
            // A second EXTINF while awaiting a URL overwrites the pending entry
            if item.stream_url.is_empty() {
                self.state = ParseState::AwaitingUrl(item);
            } else {
                self.state = ParseState::Idle;
                self.emit(item);
            }
            return;
        }

        if line.starts_with('#') {
            return;
        }

        // Plain line: the URL of the pending entry, if there is one
        if let ParseState::AwaitingUrl(mut item) = std::mem::replace(&mut self.state, ParseState::Idle) {
            item.stream_url = line.to_string();
            self.emit(item);
        }
    }

    fn emit(&mut self, mut item: ParsedItem) {
        if item.name.is_empty() {
            item.name = item.tvg_name.clone();
        }
        if item.name.is_empty() {
            item.name = PLACEHOLDER_NAME.to_string();
        }
        if item.group_title.is_empty() {
            item.group_title = self.default_group.clone();
        }
        self.items.push(item);
    }

    fn finish(self) -> Vec<ParsedItem> {
        self.items
    }
}

/// Parse the part of an `#EXTINF:` line after the marker.
///
/// Name and group fallbacks are not applied here; see [`M3uParser::emit`].
fn parse_extinf(info: &str) -> ParsedItem {
    let info = info.trim();

    let (attr_part, raw_name) = match info.find(',') {
        Some(idx) => (info[..idx].trim(), info[idx + 1..].trim()),
        None => (info, ""),
    };

    let mut attrs = extract_attrs(attr_part);
    let mut item = ParsedItem {
        name: raw_name.to_string(),
        tvg_id: attrs.remove("tvg-id").unwrap_or_default(),
        tvg_name: attrs.remove("tvg-name").unwrap_or_default(),
        tvg_logo: attrs.remove("tvg-logo").unwrap_or_default(),
        group_title: attrs.remove("group-title").unwrap_or_default(),
        ..Default::default()
    };

    // Some feeds put the stream URL after the display name on the same line
    if let Some(idx) = find_inline_url(raw_name) {
        item.stream_url = raw_name[idx..].trim().to_string();
        item.name = raw_name[..idx].trim().to_string();
    }

    item
}

/// Extract `key="value"` pairs. A repeated key keeps its last value.
fn extract_attrs(segment: &str) -> HashMap<String, String> {
    attr_regex()
        .captures_iter(segment)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Byte offset of the earliest `http://` or `https://` in `s`
fn find_inline_url(s: &str) -> Option<usize> {
    match (s.find("http://"), s.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
#[path = "m3u_parser_tests.rs"]
mod tests;
