//! Scoped element scanner for the scanner's XML output
//!
//! Not an XML parser: it finds start tags by exact element name inside a
//! given span, reads their attributes and, where asked, the body up to the
//! matching end tag. Elements of the same name are assumed not to nest,
//! which holds for every element the parser looks at. Anything incomplete
//! (a start tag cut off mid-attribute, a body without its end tag) is simply
//! not yielded.

/// One element occurrence inside a span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    /// Raw attribute text of the start tag
    pub attrs: &'a str,
    /// Content between start and end tag. None for self-closing tags.
    pub body: Option<&'a str>,
}

impl<'a> Element<'a> {
    /// Unescaped value of attribute `name`
    pub fn attr(&self, name: &str) -> Option<String> {
        attribute(self.attrs, name)
    }

    /// Attribute value, treating an empty string as absent
    pub fn non_empty_attr(&self, name: &str) -> Option<String> {
        self.attr(name).filter(|v| !v.trim().is_empty())
    }
}

/// How the search for a start tag's `>` ended
enum TagEnd {
    /// Index of `>` and whether the tag is self-closing
    Closed(usize, bool),
    /// Another `<` showed up first; only this tag is broken
    Malformed,
    /// Input ran out
    Truncated,
}

/// Start tag located by [`next_start_tag`]
struct StartTag<'a> {
    attrs: &'a str,
    self_closing: bool,
    /// Index just past the closing `>`
    end: usize,
}

/// Start tags of `name` in `text`, bodies ignored
pub fn tags<'a>(text: &'a str, name: &str) -> Vec<Element<'a>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(tag) = next_start_tag(text, name, pos) {
        found.push(Element {
            attrs: tag.attrs,
            body: None,
        });
        pos = tag.end;
    }
    found
}

/// Elements of `name` in `text` with their bodies. Unclosed elements are
/// dropped; self-closing ones are yielded with no body.
pub fn elements<'a>(text: &'a str, name: &str) -> Vec<Element<'a>> {
    let close = format!("</{}>", name);
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(tag) = next_start_tag(text, name, pos) {
        if tag.self_closing {
            found.push(Element {
                attrs: tag.attrs,
                body: None,
            });
            pos = tag.end;
            continue;
        }

        match text[tag.end..].find(&close) {
            Some(offset) => {
                let body_end = tag.end + offset;
                found.push(Element {
                    attrs: tag.attrs,
                    body: Some(&text[tag.end..body_end]),
                });
                pos = body_end + close.len();
            }
            // Truncated: nothing after this can be complete either
            None => break,
        }
    }

    found
}

/// Find the next `<name` start tag at or after `from`
fn next_start_tag<'a>(text: &'a str, name: &str, from: usize) -> Option<StartTag<'a>> {
    let opener = format!("<{}", name);
    let mut pos = from;

    loop {
        let start = pos + text.get(pos..)?.find(&opener)?;
        let after_name = start + opener.len();

        // Exact name only: `<host` must not match `<hostname`
        let boundary = text[after_name..].chars().next();
        match boundary {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => {}
            Some(_) => {
                pos = after_name;
                continue;
            }
            None => return None,
        }

        let (close, self_closing) = match find_tag_end(text, after_name) {
            TagEnd::Closed(close, self_closing) => (close, self_closing),
            TagEnd::Malformed => {
                pos = after_name;
                continue;
            }
            TagEnd::Truncated => return None,
        };
        let attrs_end = if self_closing { close - 1 } else { close };
        return Some(StartTag {
            attrs: text[after_name..attrs_end].trim(),
            self_closing,
            end: close + 1,
        });
    }
}

/// Index of the `>` closing a start tag, skipping quoted attribute values
fn find_tag_end(text: &str, from: usize) -> TagEnd {
    let mut quote: Option<char> = None;
    let mut prev = '\0';

    for (offset, c) in text[from..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '>' => return TagEnd::Closed(from + offset, prev == '/'),
                '<' => return TagEnd::Malformed,
                _ => {}
            },
        }
        prev = c;
    }

    TagEnd::Truncated
}

/// Read attribute `name` from raw start-tag text
pub fn attribute(attrs: &str, name: &str) -> Option<String> {
    let mut rest = attrs;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            return None;
        }

        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        rest = rest[key_end..].trim_start();

        if !rest.starts_with('=') {
            // Valueless attribute; move on
            if key.is_empty() {
                return None;
            }
            continue;
        }
        rest = rest[1..].trim_start();

        let (value, remainder) = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &rest[1..];
                let end = inner.find(q)?;
                (&inner[..end], &inner[end + 1..])
            }
            Some(_) => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            }
            None => return None,
        };

        if key == name {
            return Some(unescape(value));
        }
        rest = remainder;
    }
}

/// Decode the predefined XML entities and numeric character references
pub fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => decode_numeric(entity),
            };
            ch.map(|c| (c, semi + 1))
        });

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_numeric(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}
