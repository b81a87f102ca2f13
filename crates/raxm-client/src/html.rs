//! Small HTML fragment parser and serializer for component markup.
//!
//! Only what server-rendered component HTML needs: elements, attributes,
//! text, comments, void and raw-text elements, and the common entities.

use crate::dom::{Document, NodeId, NodeKind};
use crate::error::DomError;
use std::borrow::Cow;

const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Parse `html` into a fresh document whose root holds the fragment.
pub fn parse_fragment(html: &str) -> Result<Document, DomError> {
    let mut document = Document::new();
    parse_into(&mut document, Document::ROOT, html)?;
    Ok(document)
}

/// Parse `html` and append the resulting nodes under `parent`.
pub fn parse_into(document: &mut Document, parent: NodeId, html: &str) -> Result<(), DomError> {
    let mut open = vec![parent];
    let mut rest = html;

    while !rest.is_empty() {
        let current = open.last().copied().unwrap_or(parent);

        if let Some(after) = rest.strip_prefix("<!--") {
            let end = after.find("-->").ok_or(DomError::Unterminated("comment"))?;
            let comment = document.create_comment(&after[..end]);
            document.append_child(current, comment);
            rest = &after[end + 3..];
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').ok_or(DomError::Unterminated("declaration"))?;
            rest = &rest[end + 1..];
        } else if let Some(after) = rest.strip_prefix("</") {
            let end = after.find('>').ok_or(DomError::Unterminated("end tag"))?;
            let name = after[..end].trim().to_ascii_lowercase();
            if let Some(position) = open
                .iter()
                .rposition(|node| *node != parent && document.tag(*node) == Some(name.as_str()))
            {
                open.truncate(position);
            }
            rest = &after[end + 1..];
        } else if rest.starts_with('<') && starts_tag_name(&rest[1..]) {
            let tag = parse_start_tag(&rest[1..])?;
            rest = &rest[1 + tag.consumed..];

            let element = document.create_element(&tag.name);
            if let Some(data) = document.element_mut(element) {
                for (name, value) in tag.attrs {
                    data.attrs.entry(name).or_insert(value);
                }
            }
            document.append_child(current, element);

            let name = tag.name.as_str();
            if RAW_TEXT_ELEMENTS.contains(&name) && !tag.self_closing {
                let (text, remaining) = raw_text(rest, name)?;
                if !text.is_empty() {
                    let decoded = if name == "textarea" || name == "title" {
                        decode_entities(text)
                    } else {
                        Cow::Borrowed(text)
                    };
                    let node = document.create_text(&decoded);
                    document.append_child(element, node);
                }
                rest = remaining;
            } else if !is_void(name) && !tag.self_closing {
                open.push(element);
            }
        } else {
            let end = rest
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == '<')
                .map_or(rest.len(), |(index, _)| index);
            let node = document.create_text(&decode_entities(&rest[..end]));
            document.append_child(current, node);
            rest = &rest[end..];
        }
    }
    Ok(())
}

fn starts_tag_name(input: &str) -> bool {
    input.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

struct StartTag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
    consumed: usize,
}

/// Parse from just after `<` up to and including `>`.
fn parse_start_tag(input: &str) -> Result<StartTag, DomError> {
    let bytes = input.as_bytes();
    let mut index = 0;
    while index < bytes.len() && is_name_byte(bytes[index]) {
        index += 1;
    }
    let name = input[..index].to_ascii_lowercase();
    let mut attrs = Vec::new();

    loop {
        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        match bytes.get(index) {
            None => return Err(DomError::Unterminated("start tag")),
            Some(b'>') => {
                return Ok(StartTag {
                    name,
                    attrs,
                    self_closing: false,
                    consumed: index + 1,
                });
            }
            Some(b'/') if bytes.get(index + 1) == Some(&b'>') => {
                return Ok(StartTag {
                    name,
                    attrs,
                    self_closing: true,
                    consumed: index + 2,
                });
            }
            Some(b'/') => index += 1,
            Some(_) => {
                let start = index;
                while index < bytes.len()
                    && !bytes[index].is_ascii_whitespace()
                    && !matches!(bytes[index], b'=' | b'>' | b'/')
                {
                    index += 1;
                }
                let attr = input[start..index].to_ascii_lowercase();
                while index < bytes.len() && bytes[index].is_ascii_whitespace() {
                    index += 1;
                }
                if bytes.get(index) != Some(&b'=') {
                    attrs.push((attr, String::new()));
                    continue;
                }
                index += 1;
                while index < bytes.len() && bytes[index].is_ascii_whitespace() {
                    index += 1;
                }
                let value = match bytes.get(index) {
                    Some(quote @ (b'"' | b'\'')) => {
                        let close = input[index + 1..]
                            .find(char::from(*quote))
                            .ok_or(DomError::Unterminated("attribute value"))?;
                        let value = &input[index + 1..index + 1 + close];
                        index += close + 2;
                        value
                    }
                    _ => {
                        let start = index;
                        while index < bytes.len()
                            && !bytes[index].is_ascii_whitespace()
                            && bytes[index] != b'>'
                        {
                            index += 1;
                        }
                        &input[start..index]
                    }
                };
                attrs.push((attr, decode_entities(value).into_owned()));
            }
        }
    }
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b':'
}

/// Split `input` at the closing tag of the raw-text element `name`.
fn raw_text<'a>(input: &'a str, name: &str) -> Result<(&'a str, &'a str), DomError> {
    let closing = format!("</{name}");
    let end = input
        .to_ascii_lowercase()
        .find(&closing)
        .ok_or(DomError::Unterminated("raw text element"))?;
    let after = &input[end..];
    let close = after.find('>').ok_or(DomError::Unterminated("end tag"))?;
    Ok((&input[..end], &after[close + 1..]))
}

pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            }?;
            Some((c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn escape_into(out: &mut String, value: &str, attribute: bool) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

pub(crate) fn write_node(document: &Document, id: NodeId, out: &mut String) {
    match document.kind(id) {
        NodeKind::Root => {
            for child in document.children(id) {
                write_node(document, *child, out);
            }
        }
        NodeKind::Text(text) => {
            let raw = document
                .parent(id)
                .and_then(|parent| document.tag(parent))
                .is_some_and(|tag| tag == "script" || tag == "style");
            if raw {
                out.push_str(text);
            } else {
                escape_into(out, text, false);
            }
        }
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_into(out, value, true);
                out.push('"');
            }
            out.push('>');
            if is_void(&element.tag) {
                return;
            }
            for child in document.children(id) {
                write_node(document, *child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

/// Serialize the children of `id`.
pub fn serialize(document: &Document, id: NodeId) -> String {
    document.inner_html(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_markup_with_directives() {
        let document = parse_fragment(
            r#"<div axm:id="c1"><button axm:click.prevent="increment(2)">+</button><span>1</span></div>"#,
        )
        .unwrap();
        let div = document.first_element_child(Document::ROOT).unwrap();
        assert_eq!(document.attr(div, "axm:id"), Some("c1"));
        let button = document.children(div)[0];
        assert_eq!(
            document.attr(button, "axm:click.prevent"),
            Some("increment(2)")
        );
        assert_eq!(document.text_content(div), "+1");
    }

    #[test]
    fn void_and_self_closing_elements_do_not_nest() {
        let document = parse_fragment(r#"<p><input name=q><br/>text</p>"#).unwrap();
        let p = document.first_element_child(Document::ROOT).unwrap();
        assert_eq!(document.children(p).len(), 3);
        assert_eq!(
            serialize(&document, Document::ROOT),
            r#"<p><input name="q"><br>text</p>"#
        );
    }

    #[test]
    fn entities_round_trip() {
        let document = parse_fragment(r#"<p title="a &quot;b&quot;">1 &lt; 2 &amp;&#33;</p>"#).unwrap();
        let p = document.first_element_child(Document::ROOT).unwrap();
        assert_eq!(document.attr(p, "title"), Some("a \"b\""));
        assert_eq!(document.text_content(p), "1 < 2 &!");
        assert_eq!(
            document.outer_html(p),
            r#"<p title="a &quot;b&quot;">1 &lt; 2 &amp;!</p>"#
        );
    }

    #[test]
    fn raw_text_elements_keep_markup() {
        let document =
            parse_fragment("<script>if (a < b) { x('</p>') }</SCRIPT><textarea>&lt;b&gt;</textarea>")
                .unwrap();
        let children = document.children(Document::ROOT).to_vec();
        assert_eq!(document.text_content(children[0]), "if (a < b) { x('</p>') }");
        assert_eq!(document.text_content(children[1]), "<b>");
    }

    #[test]
    fn comments_and_stray_end_tags() {
        let document = parse_fragment("<!-- c --><div>a</span>b</div>").unwrap();
        assert_eq!(
            serialize(&document, Document::ROOT),
            "<!-- c --><div>ab</div>"
        );
    }

    #[test]
    fn first_attribute_occurrence_wins() {
        let document = parse_fragment(r#"<a href="/one" HREF="/two"></a>"#).unwrap();
        let a = document.first_element_child(Document::ROOT).unwrap();
        assert_eq!(document.attr(a, "href"), Some("/one"));
    }

    #[test]
    fn unterminated_markup_is_an_error() {
        assert_eq!(
            parse_fragment("<div class=\"x").unwrap_err(),
            DomError::Unterminated("attribute value")
        );
        assert_eq!(
            parse_fragment("<!-- open").unwrap_err(),
            DomError::Unterminated("comment")
        );
    }
}
