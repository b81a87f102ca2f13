//! Root-element stamping and the rendered-HTML hash.

use raxm_protocol::{RaxmError, RaxmResult};
use sha2::{Digest, Sha256};

/// Hex characters of the SHA-256 digest kept in `serverMemo.htmlHash`.
pub const HTML_HASH_LEN: usize = 8;

pub fn html_hash(html: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(html.as_bytes()));
    digest.truncate(HTML_HASH_LEN);
    digest
}

pub fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Insert `attributes` right after the tag name of the first element.
pub fn stamp_root(html: &str, attributes: &[(&str, &str)]) -> RaxmResult<String> {
    let insert_at = root_tag_name_end(html)
        .ok_or_else(|| RaxmError::component("render output has no root element"))?;

    let mut stamped = String::with_capacity(html.len() + 32 * attributes.len());
    stamped.push_str(&html[..insert_at]);
    for (name, value) in attributes {
        stamped.push(' ');
        stamped.push_str(name);
        stamped.push_str("=\"");
        stamped.push_str(&escape_attribute(value));
        stamped.push('"');
    }
    stamped.push_str(&html[insert_at..]);
    Ok(stamped)
}

fn root_tag_name_end(html: &str) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'<' {
            if html[index..].starts_with("<!--") {
                index += html[index..].find("-->")? + 3;
                continue;
            }
            if bytes.get(index + 1).is_some_and(u8::is_ascii_alphabetic) {
                let name_len = bytes[index + 1..]
                    .iter()
                    .take_while(|byte| !byte.is_ascii_whitespace() && **byte != b'>' && **byte != b'/')
                    .count();
                return Some(index + 1 + name_len);
            }
        }
        index += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_after_the_root_tag_name() {
        let html = "<div class=\"counter\"><span>1</span></div>";
        let stamped = stamp_root(html, &[("axm:id", "abc")]).unwrap();
        assert_eq!(
            stamped,
            "<div axm:id=\"abc\" class=\"counter\"><span>1</span></div>"
        );
    }

    #[test]
    fn skips_leading_comments_and_text() {
        let html = "\n  <!-- <b>not me</b> -->\n<section/>";
        let stamped = stamp_root(html, &[("axm:id", "x")]).unwrap();
        assert!(stamped.ends_with("<section axm:id=\"x\"/>"));
    }

    #[test]
    fn escapes_attribute_values() {
        let stamped = stamp_root("<p>hi</p>", &[("axm:initial-data", r#"{"a":"<&>"}"#)]).unwrap();
        assert_eq!(
            stamped,
            "<p axm:initial-data=\"{&quot;a&quot;:&quot;&lt;&amp;&gt;&quot;}\">hi</p>"
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(stamp_root("just text", &[("axm:id", "x")]).is_err());
        assert!(stamp_root("<!-- only -->", &[("axm:id", "x")]).is_err());
    }

    #[test]
    fn hash_is_short_and_stable() {
        let first = html_hash("<div>1</div>");
        assert_eq!(first.len(), HTML_HASH_LEN);
        assert_eq!(first, html_hash("<div>1</div>"));
        assert_ne!(first, html_hash("<div>2</div>"));
    }
}
