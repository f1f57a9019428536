//! HTML parsing and tokenization.
//!
//! One DOM parse feeds three extractions: visible text (document order,
//! script/style subtrees skipped), the first `<title>`, and `<a href>` links
//! with their anchor text. The text is then tokenized into a position-tagged
//! term stream for the indexer.

use ego_tree::NodeRef;
use regex::Regex;
use scraper::{Html, Node, Selector};
use std::collections::HashMap;

use crate::url_utils;

/// Everything the indexer needs from one page.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub url: String,
    pub title: String,
    pub text: String,
    /// Raw token stream, in document order
    pub tokens: Vec<String>,
    /// Normalized term -> positions in the raw token stream. Positions are
    /// strictly increasing per term; gaps appear where normalization dropped
    /// a token and are harmless to ranking.
    pub term_positions: HashMap<String, Vec<u32>>,
    /// (resolved url, anchor text) pairs
    pub outbound_links: Vec<(String, String)>,
}

pub struct Parser {
    token_re: Regex,
    title_selector: Selector,
    anchor_selector: Selector,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            token_re: Regex::new(r"[A-Za-z0-9_]+").expect("valid token pattern"),
            title_selector: Selector::parse("title").expect("valid selector"),
            anchor_selector: Selector::parse("a[href]").expect("valid selector"),
        }
    }

    /// Parse a fetched page. Malformed HTML never fails; the permissive
    /// parser yields whatever structure it can, down to an empty document.
    pub fn parse(&self, url: &str, body: &[u8]) -> ParsedDocument {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);

        let title = document
            .select(&self.title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let mut text = String::new();
        collect_text(document.tree.root(), &mut text);

        let outbound_links = self.extract_links(&document, url);

        let tokens: Vec<String> = self
            .token_re
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .collect();

        let mut term_positions: HashMap<String, Vec<u32>> = HashMap::new();
        for (position, token) in tokens.iter().enumerate() {
            let normalized = normalize_token(token);
            if normalized.is_empty() {
                continue;
            }
            term_positions
                .entry(normalized)
                .or_default()
                .push(position as u32);
        }

        ParsedDocument {
            url: url.to_string(),
            title,
            text,
            tokens,
            term_positions,
            outbound_links,
        }
    }

    fn extract_links(&self, document: &Html, base_url: &str) -> Vec<(String, String)> {
        let mut links = Vec::new();

        for element in document.select(&self.anchor_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let href = href.trim();

            // Skip non-navigational schemes
            if href.is_empty()
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
                || href.starts_with("file:")
            {
                continue;
            }

            let Some(resolved) = url_utils::resolve(base_url, href) else {
                continue;
            };

            let anchor_text = element.text().collect::<String>();
            links.push((resolved, anchor_text));
        }

        links
    }
}

/// Append every text node under `node` in document order, one ASCII space
/// after each, skipping `<script>` and `<style>` subtrees entirely.
fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            out.push_str(text);
            out.push(' ');
        }
        Node::Element(element) => {
            if matches!(element.name(), "script" | "style") {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

/// Lowercase and strip non-alphanumerics; may come back empty.
fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
