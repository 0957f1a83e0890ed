// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bidirectional content rewriting between source and target mention/markup
//! syntax.

use chrono::{TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

const MAX_LEN: usize = 2000;
const TRUNCATE_KEEP: usize = 1997;

lazy_static! {
    static ref SPOILER_SOURCE: Regex = Regex::new(r"\|\|(?s)(.*?)\|\|").unwrap();
    static ref SPOILER_TARGET: Regex = Regex::new(r"!!(?s)(.*?)!!").unwrap();
    static ref USER_MENTION_SOURCE: Regex = Regex::new(r"<@!?(\d+)>").unwrap();
    static ref CHANNEL_MENTION_SOURCE: Regex = Regex::new(r"<#(\d+)>").unwrap();
    static ref ROLE_MENTION_SOURCE: Regex = Regex::new(r"<@&(\d+)>").unwrap();
    static ref EMOJI_SOURCE: Regex = Regex::new(r"<a?:(\w+):(\d+)>").unwrap();
    static ref TIMESTAMP_SOURCE: Regex = Regex::new(r"<t:(-?\d+)(?::(\w))?>").unwrap();
    static ref USER_MENTION_TARGET: Regex = Regex::new(r"<@([A-Z0-9]{26})>").unwrap();
    static ref CHANNEL_MENTION_TARGET: Regex = Regex::new(r"<#([A-Z0-9]{26})>").unwrap();
}

/// Translates source-platform markup into target-platform markup.
pub fn to_target(content: &str) -> String {
    let mut out = SPOILER_SOURCE.replace_all(content, "!!$1!!").into_owned();
    out = USER_MENTION_SOURCE
        .replace_all(&out, "@unknown-user")
        .into_owned();
    out = CHANNEL_MENTION_SOURCE
        .replace_all(&out, "#unknown-channel")
        .into_owned();
    out = ROLE_MENTION_SOURCE
        .replace_all(&out, "@unknown-role")
        .into_owned();
    out = EMOJI_SOURCE.replace_all(&out, ":$1:").into_owned();
    out = TIMESTAMP_SOURCE
        .replace_all(&out, |caps: &regex::Captures| {
            caps[1]
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned();
    truncate(&out)
}

/// Translates target-platform markup into source-platform markup.
pub fn to_source(content: &str) -> String {
    let mut out = SPOILER_TARGET.replace_all(content, "||$1||").into_owned();
    out = USER_MENTION_TARGET
        .replace_all(&out, "@unknown-user")
        .into_owned();
    out = CHANNEL_MENTION_TARGET
        .replace_all(&out, "#unknown-channel")
        .into_owned();
    truncate(&out)
}

fn truncate(content: &str) -> String {
    if content.chars().count() <= MAX_LEN {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(TRUNCATE_KEEP).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spoiler_round_trips() {
        let source = "a ||secret|| b";
        let target = to_target(source);
        assert_eq!(target, "a !!secret!! b");
        assert_eq!(to_source(&target), source);
    }

    #[test]
    fn bold_italic_and_code_fences_pass_through_untouched() {
        let body = "**bold** *italic* `code` ```block```";
        assert_eq!(to_target(body), body);
        assert_eq!(to_source(body), body);
    }

    #[test]
    fn links_pass_through_untouched() {
        let body = "see https://example.com/x?y=1 for details";
        assert_eq!(to_target(body), body);
        assert_eq!(to_source(body), body);
    }

    #[test]
    fn user_mentions_become_stand_ins() {
        assert_eq!(to_target("hi <@123456789012345678>"), "hi @unknown-user");
        assert_eq!(to_source("hi <@01HABCDEFGHJKMNPQRSTVWXYZ1>"), "hi @unknown-user");
    }

    #[test]
    fn custom_emoji_becomes_name_colons() {
        assert_eq!(to_target("react <a:party:998877>"), "react :party:");
    }

    #[test]
    fn truncates_long_content_with_ellipsis() {
        let long = "x".repeat(2100);
        let out = to_target(&long);
        assert_eq!(out.chars().count(), MAX_LEN);
        assert!(out.ends_with("..."));
    }
}
