//! HTML Fragment Parsing
//!
//! A small, lenient HTML parser sufficient for the markup the renderer
//! and streaming protocol produce: elements, attributes in all three
//! quoting forms, void elements, comments, doctype, and raw-text
//! `script`/`style` content. Character entities pass through untouched;
//! markup is byte-preserved into text nodes.
//!
//! The parser never fails: malformed input degrades to text, stray close
//! tags are ignored, and unclosed elements close at end of input.

use super::node::{is_void_element, Node};

/// Parse `input` into its root nodes.
pub fn parse_fragment(input: &str) -> Vec<Node> {
    Parser::new(input).run()
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    roots: Vec<Node>,
    open: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
            roots: Vec::new(),
            open: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Node> {
        while self.pos < self.bytes.len() {
            if self.peek() == b'<' {
                self.tag();
            } else {
                self.text();
            }
        }
        self.roots
    }

    fn peek(&self) -> u8 {
        self.bytes[self.pos]
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().len() >= prefix.len()
            && self.rest()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    }

    /// Advance past `needle`, or to end of input if absent.
    fn skip_past(&mut self, needle: &str) {
        let haystack = self.rest();
        let needle = needle.as_bytes();
        let mut i = 0;
        while i + needle.len() <= haystack.len() {
            if haystack[i..i + needle.len()].eq_ignore_ascii_case(needle) {
                self.pos += i + needle.len();
                return;
            }
            i += 1;
        }
        self.pos = self.bytes.len();
    }

    fn attach(&mut self, node: Node) {
        match self.open.last() {
            Some(parent) => parent.append_child(node),
            None => self.roots.push(node),
        }
    }

    fn text(&mut self) {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.peek() != b'<' {
            self.pos += 1;
        }
        let slice = &self.bytes[start..self.pos];
        if !slice.is_empty() {
            let text = String::from_utf8_lossy(slice).into_owned();
            self.attach(Node::text(&text));
        }
    }

    fn tag(&mut self) {
        if self.starts_with("<!--") {
            self.skip_past("-->");
            return;
        }
        if self.starts_with("<!") {
            self.skip_past(">");
            return;
        }
        if self.starts_with("</") {
            self.close_tag();
            return;
        }

        self.pos += 1; // consume '<'
        let name = self.tag_name();
        if name.is_empty() {
            // Lone '<': degrade to text.
            self.attach(Node::text("<"));
            return;
        }

        let node = Node::element(&name);
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            if self.pos >= self.bytes.len() {
                break;
            }
            match self.peek() {
                b'>' => {
                    self.pos += 1;
                    break;
                }
                b'/' => {
                    self.pos += 1;
                    self_closing = true;
                }
                _ => {
                    let (attr, value) = self.attribute();
                    if !attr.is_empty() {
                        node.set_attr(&attr, &value);
                    }
                }
            }
        }

        let tag = node.tag().unwrap_or_default();
        self.attach(node.clone());

        if self_closing || is_void_element(&tag) {
            return;
        }

        if tag == "script" || tag == "style" {
            self.raw_text(&node, &tag);
            return;
        }

        self.open.push(node);
    }

    fn close_tag(&mut self) {
        self.pos += 2; // consume '</'
        let name = self.tag_name();
        self.skip_past(">");

        if name.is_empty() {
            return;
        }

        // Pop to the nearest matching open element; ignore a stray close.
        if let Some(found) = self
            .open
            .iter()
            .rposition(|el| el.tag().as_deref() == Some(name.as_str()))
        {
            self.open.truncate(found);
        }
    }

    /// Consume raw text content up to the matching close tag.
    fn raw_text(&mut self, node: &Node, tag: &str) {
        let close = format!("</{tag}");
        let start = self.pos;

        let haystack = self.rest();
        let needle = close.as_bytes();
        let mut end = haystack.len();
        let mut i = 0;
        while i + needle.len() <= haystack.len() {
            if haystack[i..i + needle.len()].eq_ignore_ascii_case(needle) {
                end = i;
                break;
            }
            i += 1;
        }

        let content = String::from_utf8_lossy(&self.bytes[start..start + end]).into_owned();
        if !content.is_empty() {
            node.append_child(Node::text(&content));
        }
        self.pos = start + end;
        if self.pos < self.bytes.len() {
            self.skip_past(">");
        }
    }

    fn tag_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.peek();
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':' {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).to_ascii_lowercase()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.peek().is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn attribute(&mut self) -> (String, String) {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.peek();
            if b.is_ascii_whitespace() || b == b'=' || b == b'>' || b == b'/' {
                break;
            }
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();

        self.skip_whitespace();
        if self.pos >= self.bytes.len() || self.peek() != b'=' {
            return (name, String::new());
        }
        self.pos += 1; // consume '='
        self.skip_whitespace();
        if self.pos >= self.bytes.len() {
            return (name, String::new());
        }

        let value = match self.peek() {
            quote @ (b'"' | b'\'') => {
                self.pos += 1;
                let start = self.pos;
                while self.pos < self.bytes.len() && self.peek() != quote {
                    self.pos += 1;
                }
                let value = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                if self.pos < self.bytes.len() {
                    self.pos += 1; // consume the closing quote
                }
                value
            }
            _ => {
                let start = self.pos;
                while self.pos < self.bytes.len() {
                    let b = self.peek();
                    if b.is_ascii_whitespace() || b == b'>' {
                        break;
                    }
                    self.pos += 1;
                }
                String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
            }
        };

        (name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_text() {
        let roots = parse_fragment("<div class=\"a\"><span>hi</span>there</div>");
        assert_eq!(roots.len(), 1);

        let div = &roots[0];
        assert_eq!(div.tag().as_deref(), Some("div"));
        assert_eq!(div.attr("class").as_deref(), Some("a"));

        let children = div.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].tag().as_deref(), Some("span"));
        assert_eq!(children[0].children()[0].node_value().as_deref(), Some("hi"));
        assert_eq!(children[1].node_value().as_deref(), Some("there"));
    }

    #[test]
    fn parses_all_attribute_quoting_forms() {
        let roots = parse_fragment("<input type=text name='n' value=\"v\" disabled>");
        let input = &roots[0];
        assert_eq!(input.attr("type").as_deref(), Some("text"));
        assert_eq!(input.attr("name").as_deref(), Some("n"));
        assert_eq!(input.attr("value").as_deref(), Some("v"));
        assert_eq!(input.attr("disabled").as_deref(), Some(""));
        // Void element: no children possible, parsing continues as siblings.
        assert!(input.children().is_empty());
    }

    #[test]
    fn void_and_self_closing_elements_do_not_nest() {
        let roots = parse_fragment("<div><br><img src=x><custom-el/></div><p>after</p>");
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].children().len(), 3);
        assert_eq!(roots[1].tag().as_deref(), Some("p"));
    }

    #[test]
    fn skips_comments_and_doctype() {
        let roots = parse_fragment("<!DOCTYPE html><!-- note --><div></div>");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].tag().as_deref(), Some("div"));
    }

    #[test]
    fn script_content_is_raw_text() {
        let roots = parse_fragment(r#"<script id="R:1">u$('1')</script>"#);
        assert_eq!(roots.len(), 1);

        let script = &roots[0];
        assert_eq!(script.tag().as_deref(), Some("script"));
        assert_eq!(script.attr("id").as_deref(), Some("R:1"));
        assert_eq!(
            script.children()[0].node_value().as_deref(),
            Some("u$('1')")
        );
    }

    #[test]
    fn template_resolution_unit_round_trips() {
        let unit =
            r#"<template id="U:2"><p>late</p></template><script id="R:2">u$('2')</script>"#;
        let roots = parse_fragment(unit);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].tag().as_deref(), Some("template"));
        assert_eq!(roots[0].children()[0].tag().as_deref(), Some("p"));
        assert_eq!(roots[1].tag().as_deref(), Some("script"));
    }

    #[test]
    fn stray_close_tags_are_ignored() {
        let roots = parse_fragment("</div><p>ok</p>");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].tag().as_deref(), Some("p"));
    }

    #[test]
    fn unclosed_elements_close_at_end_of_input() {
        let roots = parse_fragment("<ul><li>one<li>two");
        assert_eq!(roots.len(), 1);
        let items = roots[0].children();
        // Without an implied-close rule the second li nests; both survive.
        assert_eq!(items[0].tag().as_deref(), Some("li"));
    }
}
