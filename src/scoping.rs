//! CSS scoping post-processor.
//!
//! Qualifies the subject compound of every selector with the page's scope
//! marker. Every element of a scope carries the marker itself, so the marker
//! is bound to the element a rule styles rather than written as a leading
//! descendant prefix: `.card .title` becomes `.card .title[data-s-a]`, which
//! matches the scope's outermost elements and leaves ancestors outside the
//! component free to match. Grouping at-rules are descended into; descriptor at-rules such as
//! `@keyframes` and `@font-face` pass through untouched. Anything the scanner
//! cannot make sense of is reported as a [`CssError`] rather than emitted
//! half-scoped.

use crate::element::Attribute;
use crate::error::CssError;
use crate::options::ScopeStrategy;

const GROUPING_AT_RULES: &[&str] = &[
    "media",
    "supports",
    "container",
    "layer",
    "document",
    "-moz-document",
    "scope",
];

const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["before", "after", "first-line", "first-letter"];

/// The token binding elements to one scope id, in a given strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeMarker {
    strategy: ScopeStrategy,
    token: String,
}

impl ScopeMarker {
    pub fn new(strategy: ScopeStrategy, prefix: &str, scope_id: &str) -> Self {
        ScopeMarker {
            strategy,
            token: format!("{prefix}{scope_id}"),
        }
    }

    /// Selector fragment appended to a compound selector.
    pub fn selector(&self) -> String {
        match self.strategy {
            ScopeStrategy::Attribute => format!("[data-{}]", self.token),
            ScopeStrategy::Class => format!(".{}", self.token),
            ScopeStrategy::Where => format!(":where(.{})", self.token),
        }
    }

    /// Attribute placed on every element sharing the scope.
    pub fn element_attribute(&self) -> Attribute {
        match self.strategy {
            ScopeStrategy::Attribute => Attribute::new(format!("data-{}", self.token), true),
            ScopeStrategy::Class | ScopeStrategy::Where => Attribute::new("class", self.token.clone()),
        }
    }
}

pub fn scope_css(css: &str, marker: &ScopeMarker) -> Result<String, CssError> {
    let mut scanner = Scanner {
        src: css,
        bytes: css.as_bytes(),
        pos: 0,
    };
    let items = scanner.rules(marker, false)?;
    Ok(items.join("\n"))
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn rules(&mut self, marker: &ScopeMarker, nested: bool) -> Result<Vec<String>, CssError> {
        let opened_at = self.pos;
        let mut items = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None if nested => return Err(CssError::new("unterminated block", opened_at)),
                None => break,
                Some(b'}') if nested => {
                    self.pos += 1;
                    break;
                }
                Some(b'}') => return Err(CssError::new("unexpected '}'", self.pos)),
                Some(b'@') => items.push(self.at_rule(marker)?),
                Some(_) => items.push(self.style_rule(marker)?),
            }
        }
        Ok(items)
    }

    fn skip_trivia(&mut self) -> Result<(), CssError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.starts_with("/*") => self.skip_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), CssError> {
        let start = self.pos;
        match self.src[self.pos + 2..].find("*/") {
            Some(end) => {
                self.pos += 2 + end + 2;
                Ok(())
            }
            None => Err(CssError::new("unterminated comment", start)),
        }
    }

    fn skip_string(&mut self) -> Result<(), CssError> {
        let start = self.pos;
        let quote = self.bytes[self.pos];
        self.pos += 1;
        while let Some(c) = self.peek() {
            match c {
                b'\\' => self.pos += 2,
                b'\n' => break,
                c if c == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(CssError::new("unterminated string", start))
    }

    /// Text up to the next top-level `{` or `;`, comments removed. Leaves
    /// the cursor on the terminator.
    fn prelude(&mut self) -> Result<(String, Option<u8>), CssError> {
        let mut text = String::new();
        let mut depth = 0usize;
        let mut chunk_start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b'"' | b'\'' => self.skip_string()?,
                b'\\' => self.pos += 2,
                b'/' if self.starts_with("/*") => {
                    text.push_str(&self.src[chunk_start..self.pos]);
                    text.push(' ');
                    self.skip_comment()?;
                    chunk_start = self.pos;
                }
                b'(' | b'[' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' | b']' => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                }
                b'{' | b';' if depth == 0 => {
                    text.push_str(&self.src[chunk_start..self.pos]);
                    return Ok((text, Some(c)));
                }
                b'}' if depth == 0 => return Err(CssError::new("unexpected '}'", self.pos)),
                _ => self.pos += 1,
            }
        }
        let end = self.pos.min(self.src.len());
        text.push_str(&self.src[chunk_start..end]);
        Ok((text, None))
    }

    /// Verbatim `{ ... }` including nested blocks. Cursor must be on `{`.
    fn block(&mut self) -> Result<&'a str, CssError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                b'"' | b'\'' => self.skip_string()?,
                b'\\' => self.pos += 2,
                b'/' if self.starts_with("/*") => self.skip_comment()?,
                b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        let src = self.src;
                        return Ok(&src[start..self.pos]);
                    }
                }
                _ => self.pos += 1,
            }
        }
        Err(CssError::new("unterminated block", start))
    }

    fn at_rule(&mut self, marker: &ScopeMarker) -> Result<String, CssError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'-' || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name = self.src[start + 1..self.pos].to_ascii_lowercase();
        if name.is_empty() {
            return Err(CssError::new("at-rule without a name", start));
        }

        let (prelude, terminator) = self.prelude()?;
        let header = format!("@{}{}", &self.src[start + 1..start + 1 + name.len()], prelude.trim_end());
        match terminator {
            Some(b';') => {
                self.pos += 1;
                Ok(format!("{header};"))
            }
            Some(_) if GROUPING_AT_RULES.contains(&name.as_str()) => {
                self.pos += 1;
                let inner = self.rules(marker, true)?;
                Ok(format!("{header} {{\n{}\n}}", inner.join("\n")))
            }
            Some(_) => {
                let block = self.block()?;
                Ok(format!("{header} {block}"))
            }
            None => Err(CssError::new(format!("expected '{{' or ';' after @{name}"), start)),
        }
    }

    fn style_rule(&mut self, marker: &ScopeMarker) -> Result<String, CssError> {
        let start = self.pos;
        let (prelude, terminator) = self.prelude()?;
        if terminator != Some(b'{') {
            return Err(CssError::new("expected '{' after selector", start));
        }
        let selectors = qualify_selector_list(prelude.trim(), marker, start)?;
        let block = self.block()?;
        Ok(format!("{selectors} {block}"))
    }
}

/// Split on top-level commas, qualifying each selector.
fn qualify_selector_list(list: &str, marker: &ScopeMarker, offset: usize) -> Result<String, CssError> {
    let mut out = Vec::new();
    for selector in split_top_level(list, b',') {
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(CssError::new("empty selector", offset));
        }
        out.push(qualify_selector(selector, marker, offset)?);
    }
    Ok(out.join(", "))
}

fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\\' => i += 1,
                b'"' | b'\'' => quote = Some(c),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                c if c == separator && depth == 0 => {
                    parts.push(&text[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    parts.push(&text[start.min(text.len())..]);
    parts
}

/// Attach the marker to the subject compound, ahead of any pseudo-element.
fn qualify_selector(selector: &str, marker: &ScopeMarker, offset: usize) -> Result<String, CssError> {
    let bytes = selector.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut compound_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\\' => i += 1,
                b'"' | b'\'' => quote = Some(c),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'>' | b'+' | b'~' if depth == 0 => compound_start = i + 1,
                c if c.is_ascii_whitespace() && depth == 0 => compound_start = i + 1,
                _ => {}
            },
        }
        i += 1;
    }

    if compound_start >= bytes.len() {
        return Err(CssError::new(
            format!("selector '{selector}' ends with a combinator"),
            offset,
        ));
    }

    let compound = &selector[compound_start..];
    let insert_at = compound_start + pseudo_element_start(compound).unwrap_or(compound.len());
    Ok(format!(
        "{}{}{}",
        &selector[..insert_at],
        marker.selector(),
        &selector[insert_at..]
    ))
}

fn pseudo_element_start(compound: &str) -> Option<usize> {
    let bytes = compound.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b':' if depth == 0 => {
                if bytes.get(i + 1) == Some(&b':') {
                    return Some(i);
                }
                let rest = &compound[i + 1..];
                let name_len = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                    .unwrap_or(rest.len());
                if LEGACY_PSEUDO_ELEMENTS.contains(&rest[..name_len].to_ascii_lowercase().as_str()) {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr() -> ScopeMarker {
        ScopeMarker::new(ScopeStrategy::Attribute, "s-", "a")
    }

    #[test]
    fn test_simple_rule() {
        assert_eq!(
            scope_css(".title { color: red; }", &attr()).unwrap(),
            ".title[data-s-a] { color: red; }"
        );
    }

    #[test]
    fn test_selector_list_and_combinators() {
        let out = scope_css("h1, .card > p + span ~ em, ul li{margin:0}", &attr()).unwrap();
        assert_eq!(
            out,
            "h1[data-s-a], .card > p + span ~ em[data-s-a], ul li[data-s-a] {margin:0}"
        );
    }

    #[test]
    fn test_marker_binds_to_styled_element_not_ancestor() {
        let out = scope_css(".theme-dark .card{}", &attr()).unwrap();
        assert_eq!(out, ".theme-dark .card[data-s-a] {}");
        assert!(!out.starts_with("[data-s-a]"));
    }

    #[test]
    fn test_pseudo_classes_and_elements() {
        let out = scope_css("a:hover::before, p:after, li:nth-child(2n+1) { x: y }", &attr()).unwrap();
        assert_eq!(
            out,
            "a:hover[data-s-a]::before, p[data-s-a]:after, li:nth-child(2n+1)[data-s-a] { x: y }"
        );
        assert_eq!(
            scope_css("::selection{}", &attr()).unwrap(),
            "[data-s-a]::selection {}"
        );
    }

    #[test]
    fn test_attribute_selector_with_tricky_quotes() {
        let out = scope_css(r#"a[title="x > y, z"] {}"#, &attr()).unwrap();
        assert_eq!(out, r#"a[title="x > y, z"][data-s-a] {}"#);
    }

    #[test]
    fn test_strategies() {
        let class = ScopeMarker::new(ScopeStrategy::Class, "s-", "b");
        let wher = ScopeMarker::new(ScopeStrategy::Where, "s-", "c");
        assert_eq!(scope_css("div{}", &class).unwrap(), "div.s-b {}");
        assert_eq!(scope_css("div{}", &wher).unwrap(), "div:where(.s-c) {}");
        assert_eq!(class.element_attribute().name, "class");
        assert_eq!(attr().element_attribute().name, "data-s-a");
    }

    #[test]
    fn test_at_rules() {
        let css = "@import url(\"a.css\");\n@media (max-width: 600px) { .a { b: c } }\n@keyframes spin { from { x: 0 } to { x: 1 } }\n@font-face { font-family: X; }";
        let out = scope_css(css, &attr()).unwrap();
        assert_eq!(
            out,
            "@import url(\"a.css\");\n@media (max-width: 600px) {\n.a[data-s-a] { b: c }\n}\n@keyframes spin { from { x: 0 } to { x: 1 } }\n@font-face { font-family: X; }"
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let out = scope_css("/* header */ .a /* mid */ { b: c } /* end */", &attr()).unwrap();
        assert_eq!(out, ".a[data-s-a] { b: c }");
    }

    #[test]
    fn test_braces_inside_strings() {
        let out = scope_css(".a { content: \"}\"; }", &attr()).unwrap();
        assert_eq!(out, ".a[data-s-a] { content: \"}\"; }");
    }

    #[test]
    fn test_malformed_inputs() {
        let cases = [
            ".a { color: red;",
            ".a { } }",
            "/* open",
            " { color: red }",
            ".a, { }",
            ".a > { }",
            ".a",
            ".a { content: \"x }",
            "@media screen { .a { } ",
        ];
        for css in cases {
            assert!(scope_css(css, &attr()).is_err(), "expected error for {css:?}");
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(scope_css("  /* nothing */ ", &attr()).unwrap(), "");
    }
}
