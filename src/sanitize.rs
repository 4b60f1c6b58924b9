use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use serde::{Deserialize, Serialize};

/// How `/v1/web-fetch` wants page content rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    #[default]
    Markdown,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub content: String,
    pub truncated: bool,
}

/// Tags whose entire subtree is dropped, contents included.
fn is_dangerous_tag(tag: &str) -> bool {
    matches!(
        tag,
        "script"
            | "style"
            | "noscript"
            | "iframe"
            | "object"
            | "embed"
            | "svg"
            | "math"
            | "form"
            | "button"
            | "input"
            | "textarea"
            | "select"
    )
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "main"
            | "aside"
            | "nav"
            | "ul"
            | "ol"
            | "li"
            | "table"
            | "tr"
            | "blockquote"
            | "pre"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}

fn parse_dom(html: &str) -> Option<RcDom> {
    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .ok()
}

/// Sanitize HTML (or plain text) to safe plain text.
///
/// Dangerous subtrees are dropped with their contents, remaining markup is
/// stripped, and the result goes through [`normalize_whitespace`]. Entities
/// are decoded by the parser. With `max_chars` the output is sliced and
/// `truncated` reports whether anything was cut.
pub fn sanitize_to_text(html: &str, max_chars: Option<usize>) -> Extracted {
    let Some(dom) = parse_dom(html) else {
        return Extracted {
            content: String::new(),
            truncated: false,
        };
    };

    let mut out = String::new();
    walk_text(&dom.document, &mut out);
    finish(normalize_whitespace(&out), max_chars)
}

/// Sanitize HTML and convert the remaining structure to Markdown: ATX
/// headings, fenced code blocks, `-` bullets.
pub fn extract_markdown(html: &str, max_chars: Option<usize>) -> Extracted {
    let Some(dom) = parse_dom(html) else {
        return Extracted {
            content: String::new(),
            truncated: false,
        };
    };

    let mut w = MarkdownWriter::default();
    w.walk(&dom.document);
    finish(normalize_whitespace(&w.out), max_chars)
}

pub fn extract_content(html: &str, mode: ExtractMode, max_chars: Option<usize>) -> Extracted {
    match mode {
        ExtractMode::Text => sanitize_to_text(html, max_chars),
        ExtractMode::Markdown => extract_markdown(html, max_chars),
    }
}

fn finish(content: String, max_chars: Option<usize>) -> Extracted {
    match max_chars {
        Some(max) => {
            let (content, truncated) = truncate_chars(content, max);
            Extracted { content, truncated }
        }
        None => Extracted {
            content,
            truncated: false,
        },
    }
}

pub fn truncate_chars(s: String, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        return (s, false);
    }
    (s.chars().take(max_chars).collect(), true)
}

fn walk_text(handle: &Handle, out: &mut String) {
    match &handle.data {
        NodeData::Element { name, .. } => {
            let tag = name.local.as_ref();
            if is_dangerous_tag(tag) {
                return;
            }
            if tag == "br" {
                out.push('\n');
                return;
            }
            if is_block_tag(tag) {
                out.push('\n');
            }
            for child in handle.children.borrow().iter() {
                walk_text(child, out);
            }
            if is_block_tag(tag) {
                out.push('\n');
            }
        }
        NodeData::Text { contents } => {
            out.push_str(&contents.borrow());
        }
        // Comments, doctype, PIs carry no visible text.
        NodeData::Comment { .. } | NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {}
        _ => {
            for child in handle.children.borrow().iter() {
                walk_text(child, out);
            }
        }
    }
}

#[derive(Default)]
struct MarkdownWriter {
    out: String,
    in_pre: bool,
}

impl MarkdownWriter {
    fn block_break(&mut self) {
        if !self.out.is_empty() {
            self.out.push_str("\n\n");
        }
    }

    fn children(&mut self, handle: &Handle) {
        for child in handle.children.borrow().iter() {
            self.walk(child);
        }
    }

    fn walk(&mut self, handle: &Handle) {
        match &handle.data {
            NodeData::Element { name, attrs, .. } => {
                let tag = name.local.as_ref().to_string();
                if is_dangerous_tag(&tag) {
                    return;
                }
                match tag.as_str() {
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        let level = tag.as_bytes()[1] - b'0';
                        self.block_break();
                        for _ in 0..level {
                            self.out.push('#');
                        }
                        self.out.push(' ');
                        self.children(handle);
                        self.out.push('\n');
                    }
                    "p" | "div" | "section" | "article" | "blockquote" | "tr" => {
                        self.block_break();
                        self.children(handle);
                        self.out.push('\n');
                    }
                    "ul" | "ol" => {
                        self.block_break();
                        self.children(handle);
                        self.out.push('\n');
                    }
                    "li" => {
                        self.out.push_str("\n- ");
                        self.children(handle);
                    }
                    "pre" => {
                        self.block_break();
                        self.out.push_str("```\n");
                        self.in_pre = true;
                        self.children(handle);
                        self.in_pre = false;
                        self.out.push_str("\n```\n");
                    }
                    "code" => {
                        if self.in_pre {
                            self.children(handle);
                        } else {
                            self.out.push('`');
                            self.children(handle);
                            self.out.push('`');
                        }
                    }
                    "strong" | "b" => {
                        self.out.push_str("**");
                        self.children(handle);
                        self.out.push_str("**");
                    }
                    "em" | "i" => {
                        self.out.push('*');
                        self.children(handle);
                        self.out.push('*');
                    }
                    "a" => {
                        let href = attrs
                            .borrow()
                            .iter()
                            .find(|a| a.name.local.as_ref() == "href")
                            .map(|a| a.value.to_string());
                        match href.filter(|h| h.starts_with("https://") || h.starts_with("http://"))
                        {
                            Some(h) => {
                                self.out.push('[');
                                self.children(handle);
                                self.out.push_str("](");
                                self.out.push_str(&h);
                                self.out.push(')');
                            }
                            None => self.children(handle),
                        }
                    }
                    "br" => self.out.push('\n'),
                    "td" | "th" => {
                        self.children(handle);
                        self.out.push(' ');
                    }
                    _ => self.children(handle),
                }
            }
            NodeData::Text { contents } => {
                self.out.push_str(&contents.borrow());
            }
            NodeData::Comment { .. }
            | NodeData::Doctype { .. }
            | NodeData::ProcessingInstruction { .. } => {}
            _ => self.children(handle),
        }
    }
}

/// Shared whitespace pass: strip CRs, drop C0 controls (except TAB/LF) and
/// DEL, collapse space/tab runs to one, cap newline runs at two, trim line
/// ends and the whole result.
pub fn normalize_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    let mut newline_run = 0usize;

    for ch in input.chars() {
        match ch {
            '\r' => {}
            '\n' => {
                pending_space = false;
                newline_run += 1;
                if newline_run <= 2 {
                    while out.ends_with(' ') || out.ends_with('\t') {
                        out.pop();
                    }
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                pending_space = true;
            }
            c if (c as u32) < 0x20 || c == '\u{7f}' => {}
            c => {
                if pending_space && !out.is_empty() && !out.ends_with('\n') {
                    out.push(' ');
                }
                pending_space = false;
                newline_run = 0;
                out.push(c);
            }
        }
    }

    out.trim_matches(['\n', ' ']).to_string()
}

/// Decode the standard entity subset on plain text: `nbsp`, `amp`, `lt`,
/// `gt`, `quot`, `#39`, and numeric `&#N;` / `&#xH;` forms.
pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < input.len() {
        if bytes[i] != b'&' {
            let ch = input[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
            continue;
        }

        let rest = &input[i..];
        let Some(semi) = rest.find(';').filter(|&p| p <= 10) else {
            out.push('&');
            i += 1;
            continue;
        };
        let name = &rest[1..semi];
        let decoded = match name {
            "nbsp" => Some(' '),
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            _ => {
                if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                } else if let Some(dec) = name.strip_prefix('#') {
                    dec.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    None
                }
            }
        };

        match decoded {
            Some(c) => {
                out.push(c);
                i += semi + 1;
            }
            None => {
                out.push('&');
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_dangerous_blocks_with_contents() {
        let html = r#"<html><head><style>.x{color:red}</style></head><body>
            <script>IGNORE PREVIOUS</script><form><input value="steal"></form>
            <svg><text>HIDDEN</text></svg><p>Hello</p></body></html>"#;
        let out = sanitize_to_text(html, None);
        assert!(out.content.contains("Hello"));
        assert!(!out.content.contains("IGNORE"));
        assert!(!out.content.contains("steal"));
        assert!(!out.content.contains("HIDDEN"));
        assert!(!out.content.contains("color"));
    }

    #[test]
    fn strips_comments_and_controls() {
        let html = "<p>a<!-- secret -->b\u{0007}c</p>";
        let out = sanitize_to_text(html, None);
        assert_eq!(out.content, "abc");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(normalize_whitespace("a  \t b\r\n\n\n\n\nc"), "a b\n\nc");
        assert_eq!(normalize_whitespace("  hello  "), "hello");
    }

    #[test]
    fn truncation_reports_pre_slice_overflow() {
        let html = format!("<p>{}</p>", "a".repeat(100));
        let out = sanitize_to_text(&html, Some(10));
        assert_eq!(out.content.chars().count(), 10);
        assert!(out.truncated);

        let out = sanitize_to_text("<p>short</p>", Some(10));
        assert!(!out.truncated);
    }

    #[test]
    fn markdown_mode_emits_atx_bullets_and_fences() {
        let html = r#"<h2>Title</h2><ul><li>one</li><li>two</li></ul><pre><code>let x = 1;</code></pre>"#;
        let out = extract_markdown(html, None);
        assert!(out.content.contains("## Title"));
        assert!(out.content.contains("- one"));
        assert!(out.content.contains("- two"));
        assert!(out.content.contains("```"));
        assert!(out.content.contains("let x = 1;"));
    }

    #[test]
    fn markdown_links_keep_http_targets_only() {
        let html = r#"<a href="https://example.com/a">ok</a> <a href="javascript:alert(1)">bad</a>"#;
        let out = extract_markdown(html, None);
        assert!(out.content.contains("[ok](https://example.com/a)"));
        assert!(!out.content.contains("javascript:"));
        assert!(out.content.contains("bad"));
    }

    #[test]
    fn entity_subset_decodes() {
        assert_eq!(decode_entities("a&amp;b&lt;c&gt;d&quot;e&#39;f"), "a&b<c>d\"e'f");
        assert_eq!(decode_entities("x&nbsp;y"), "x y");
        assert_eq!(decode_entities("&#105;&#x67;"), "ig");
        assert_eq!(decode_entities("&unknown;&"), "&unknown;&");
    }
}
