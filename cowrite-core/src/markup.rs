//! Lenient markup codec for document snapshots.
//!
//! Snapshots travel as rich-text markup (`<p>hi <b>there</b></p>`). The
//! parser accepts what an editing surface typically produces: nested
//! elements with attributes, void elements, comments and character
//! references. It never fails; malformed input degrades to text.
//!
//! ```text
//! "<p>a<br>b</p>"
//!       │ parse()
//!       ▼
//! Element(p) ─┬─ Text("a")
//!             ├─ Element(br)
//!             └─ Text("b")
//! ```

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

/// Deepest element nesting the parser builds. Open tags past this depth
/// become childless siblings.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Elements that start a new visual line.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "dd", "div", "dl", "dt", "figure", "footer", "h1", "h2",
    "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "tr",
    "ul",
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn is_block_element(tag: &str) -> bool {
    BLOCK_ELEMENTS.contains(&tag)
}

/// A parsed markup fragment node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<MarkupNode>,
    },
    Text(String),
}

/// Parse a markup fragment into a forest of nodes.
pub fn parse(input: &str) -> Vec<MarkupNode> {
    Parser::new(input).run()
}

/// Escape text content for serialization.
pub fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

/// Escape an attribute value for serialization inside double quotes.
pub fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(ch),
        }
    }
}

/// Decode character references (`&amp;`, `&#39;`, `&#x27;`, …).
///
/// Unknown or unterminated references are kept verbatim.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|&end| end <= 10) {
            Some(end) => match decode_reference(&tail[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Open element on the parser stack.
struct OpenElement {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<MarkupNode>,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Top-level nodes.
    roots: Vec<MarkupNode>,
    stack: Vec<OpenElement>,
    text: String,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            roots: Vec::new(),
            stack: Vec::new(),
            text: String::new(),
        }
    }

    fn run(mut self) -> Vec<MarkupNode> {
        while self.pos < self.input.len() {
            let rest = &self.input[self.pos..];
            if rest.starts_with("<!--") {
                self.flush_text();
                self.pos += rest.find("-->").map_or(rest.len(), |end| end + 3);
            } else if rest.starts_with("</") && starts_tag_name(&rest[2..]) {
                self.flush_text();
                self.close_tag();
            } else if rest.starts_with('<') && starts_tag_name(&rest[1..]) {
                self.flush_text();
                self.open_tag();
            } else {
                let first = rest.chars().next().map_or(1, char::len_utf8);
                let next = rest[first..].find('<').map_or(rest.len(), |i| i + first);
                self.text.push_str(&rest[..next]);
                self.pos += next;
            }
        }

        self.flush_text();
        while let Some(open) = self.stack.pop() {
            self.push_node(MarkupNode::Element {
                tag: open.tag,
                attrs: open.attrs,
                children: open.children,
            });
        }
        self.roots
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.text);
        self.push_node(MarkupNode::Text(decode_entities(&raw)));
    }

    fn push_node(&mut self, node: MarkupNode) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn open_tag(&mut self) {
        // Skip '<'.
        self.pos += 1;
        let tag = self.take_name().to_ascii_lowercase();
        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            let rest = &self.input[self.pos..];
            if rest.is_empty() {
                break;
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            if rest.starts_with('/') {
                self.pos += 1;
                continue;
            }

            let name = self.take_name().to_ascii_lowercase();
            if name.is_empty() {
                // Unparseable attribute byte; skip one char.
                self.pos += rest.chars().next().map_or(1, char::len_utf8);
                continue;
            }
            self.skip_whitespace();
            let value = if self.input[self.pos..].starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                self.take_attr_value()
            } else {
                String::new()
            };
            attrs.push((name, value));
        }

        let leaf = self_closing || is_void_element(&tag);
        if !leaf && self.stack.len() >= MAX_NESTING_DEPTH {
            log::trace!("Flattening <{tag}> past depth {MAX_NESTING_DEPTH}");
        }
        if leaf || self.stack.len() >= MAX_NESTING_DEPTH {
            self.push_node(MarkupNode::Element {
                tag,
                attrs,
                children: Vec::new(),
            });
        } else {
            self.stack.push(OpenElement {
                tag,
                attrs,
                children: Vec::new(),
            });
        }
    }

    fn close_tag(&mut self) {
        // Skip '</'.
        self.pos += 2;
        let tag = self.take_name().to_ascii_lowercase();
        let rest = &self.input[self.pos..];
        self.pos += rest.find('>').map_or(rest.len(), |end| end + 1);

        if !self.stack.iter().any(|open| open.tag == tag) {
            log::trace!("Ignoring stray close tag </{tag}>");
            return;
        }
        while let Some(open) = self.stack.pop() {
            let matched = open.tag == tag;
            self.push_node(MarkupNode::Element {
                tag: open.tag,
                attrs: open.attrs,
                children: open.children,
            });
            if matched {
                break;
            }
        }
    }

    fn take_name(&mut self) -> &'a str {
        let rest = &self.input[self.pos..];
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '/' | '=' | '<'))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn take_attr_value(&mut self) -> String {
        let rest = &self.input[self.pos..];
        let raw = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let body = &rest[1..];
                let end = body.find(quote).unwrap_or(body.len());
                self.pos += 1 + end + usize::from(end < body.len());
                &body[..end]
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += end;
                &rest[..end]
            }
        };
        decode_entities(raw)
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }
}

fn starts_tag_name(rest: &str) -> bool {
    rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> MarkupNode {
        MarkupNode::Text(s.to_string())
    }

    #[test]
    fn test_parse_nested_elements() {
        let nodes = parse("<p>hi <b>there</b></p>");
        assert_eq!(
            nodes,
            vec![MarkupNode::Element {
                tag: "p".into(),
                attrs: vec![],
                children: vec![
                    text("hi "),
                    MarkupNode::Element {
                        tag: "b".into(),
                        attrs: vec![],
                        children: vec![text("there")],
                    },
                ],
            }]
        );
    }

    #[test]
    fn test_parse_attributes() {
        let nodes = parse(r#"<span style="color: red" data-x='1' hidden>x</span>"#);
        match &nodes[0] {
            MarkupNode::Element { tag, attrs, .. } => {
                assert_eq!(tag, "span");
                assert_eq!(
                    attrs,
                    &vec![
                        ("style".to_string(), "color: red".to_string()),
                        ("data-x".to_string(), "1".to_string()),
                        ("hidden".to_string(), String::new()),
                    ]
                );
            }
            other => panic!("Expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_void_elements() {
        let nodes = parse("a<br>b<img src=x.png/>c");
        assert_eq!(nodes.len(), 5);
        assert!(matches!(
            &nodes[1],
            MarkupNode::Element { tag, children, .. } if tag == "br" && children.is_empty()
        ));
        assert_eq!(nodes[4], text("c"));
    }

    #[test]
    fn test_parse_unclosed_and_stray_tags() {
        let nodes = parse("<p>one</span>two");
        assert_eq!(
            nodes,
            vec![MarkupNode::Element {
                tag: "p".into(),
                attrs: vec![],
                children: vec![text("one"), text("two")],
            }]
        );
    }

    #[test]
    fn test_parse_misnested_close_pops_to_match() {
        let nodes = parse("<b><i>x</b>y");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1], text("y"));
    }

    #[test]
    fn test_parse_caps_nesting_depth() {
        let input = format!("{}x", "<b>".repeat(MAX_NESTING_DEPTH + 100));
        let nodes = parse(&input);

        let mut depth = 0;
        let mut level = &nodes;
        loop {
            match level.first() {
                Some(MarkupNode::Element { children, .. }) if !children.is_empty() => {
                    depth += 1;
                    level = children;
                }
                _ => break,
            }
        }
        assert_eq!(depth, MAX_NESTING_DEPTH);
        // The flattened tags and the text sit at the deepest level.
        assert_eq!(level.len(), 101);
        assert_eq!(level.last(), Some(&text("x")));
    }

    #[test]
    fn test_parse_literal_less_than() {
        let nodes = parse("1 < 2 <3");
        assert_eq!(nodes, vec![text("1 < 2 <3")]);
    }

    #[test]
    fn test_parse_skips_comments() {
        let nodes = parse("a<!-- note -->b");
        assert_eq!(nodes, vec![text("a"), text("b")]);
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#39;&#x41;&nbsp;"), "'A\u{a0}");
        assert_eq!(decode_entities("AT&T &bogus; &"), "AT&T &bogus; &");
    }

    #[test]
    fn test_escape_text() {
        let mut out = String::new();
        escape_text("<a & b>", &mut out);
        assert_eq!(out, "&lt;a &amp; b&gt;");
    }

    #[test]
    fn test_escape_attr() {
        let mut out = String::new();
        escape_attr(r#"say "hi" & go"#, &mut out);
        assert_eq!(out, "say &quot;hi&quot; &amp; go");
    }

    #[test]
    fn test_block_and_void_tables() {
        assert!(is_block_element("p"));
        assert!(!is_block_element("b"));
        assert!(is_void_element("br"));
        assert!(!is_void_element("p"));
    }
}
