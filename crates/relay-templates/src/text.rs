//! Plain-text rendition of an HTML body.

/// Elements whose closing tag ends a line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "table", "ul", "ol",
    "blockquote", "section", "header", "footer", "article", "td",
];

/// Elements whose content is dropped entirely.
const SKIPPED_ELEMENTS: &[&str] = &["style", "script", "head", "title"];

/// Converts HTML to plain text.
///
/// Tags are stripped, block-level closers and `<br>` become line breaks,
/// basic entities are decoded and runs of whitespace collapse to one space.
pub fn html_to_text(html: &str) -> String {
    let stripped = strip_tags(html);
    let decoded = decode_entities(&stripped);
    collapse_whitespace(&decoded)
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('>') else {
            // Unterminated tag: drop the remainder.
            rest = "";
            break;
        };
        let tag = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let (closing, name) = tag_name(tag);
        if !closing && SKIPPED_ELEMENTS.contains(&name.as_str()) {
            let end = format!("</{}", name);
            rest = match find_ignore_case(rest, &end) {
                Some(at) => rest[at..].find('>').map_or("", |gt| &rest[at + gt + 1..]),
                None => "",
            };
            continue;
        }

        if name == "br" || name == "hr" || (closing && BLOCK_ELEMENTS.contains(&name.as_str())) {
            out.push('\n');
        } else {
            out.push(' ');
        }
    }

    out.push_str(rest);
    out
}

fn tag_name(tag: &str) -> (bool, String) {
    let tag = tag.trim();
    let (closing, tag) = match tag.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, tag),
    };
    let name = tag
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    (closing, name)
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
