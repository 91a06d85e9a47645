//! CSS selection over parsed HTML with Scrapy-style pseudo-elements.
//!
//! Queries are plain CSS understood by the `scraper` crate, optionally
//! ending in one of:
//!
//! - `::text`: the direct child text nodes of each match
//! - ` ::text` (note the space): every descendant text node of each match
//! - `::attr(name)`: the value of attribute `name` on each match
//!
//! A query may hold several comma-separated groups, e.g.
//! `h2::text, .product-title::text`. Groups are evaluated in order and
//! their results concatenated, so `get()` prefers earlier groups.
//!
//! A query run relative to an element searches that element and its
//! descendants, so `div.product::attr(data-sku)` also reads the attribute
//! off a `div.product` context node.

use scraper::{ElementRef, Html, Selector};

use crate::error::{Error, ResponseParseError, Result};

/// What to pull out of each matched element
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pseudo {
    /// The element itself (outer HTML when stringified)
    Element,
    /// Direct child text nodes
    Text,
    /// Text nodes of the element and all of its descendants
    DescendantText,
    /// An attribute value
    Attr(String),
}

#[derive(Debug, Clone)]
struct Group {
    /// `None` means the pseudo-element applies to the context node itself
    selector: Option<Selector>,
    pseudo: Pseudo,
}

/// A compiled selector query
#[derive(Debug, Clone)]
pub struct CssQuery {
    source: String,
    groups: Vec<Group>,
}

impl CssQuery {
    /// Compile a query, reporting syntax errors up front
    pub fn parse(query: &str) -> Result<Self> {
        let groups = split_groups(query)
            .into_iter()
            .map(parse_group)
            .collect::<Result<Vec<_>>>()?;

        if groups.is_empty() {
            return Err(css_error(format!("empty selector: {:?}", query)));
        }

        Ok(Self {
            source: query.to_string(),
            groups,
        })
    }

    /// The query as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn apply<'a>(&self, scope: Scope<'a>, out: &mut Vec<Selected<'a>>) {
        for group in &self.groups {
            let elements: Vec<ElementRef<'a>> = match (&group.selector, scope) {
                (Some(selector), Scope::Document(html)) => html.select(selector).collect(),
                (Some(selector), Scope::Element(element)) => selector
                    .matches(&element)
                    .then_some(element)
                    .into_iter()
                    .chain(element.select(selector))
                    .collect(),
                (None, Scope::Document(html)) => vec![html.root_element()],
                (None, Scope::Element(element)) => vec![element],
            };

            for element in elements {
                match &group.pseudo {
                    Pseudo::Element => out.push(Selected::Element(element)),
                    Pseudo::Text => out.extend(
                        element
                            .children()
                            .filter_map(|child| child.value().as_text())
                            .map(|text| Selected::Text(String::from(&**text))),
                    ),
                    Pseudo::DescendantText => out.extend(
                        element
                            .text()
                            .map(|text| Selected::Text(text.to_string())),
                    ),
                    Pseudo::Attr(name) => {
                        if let Some(value) = element.value().attr(name) {
                            out.push(Selected::Text(value.to_string()));
                        }
                    }
                }
            }
        }
    }
}

impl std::str::FromStr for CssQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Clone, Copy)]
enum Scope<'a> {
    Document(&'a Html),
    Element(ElementRef<'a>),
}

fn css_error(message: String) -> Error {
    Error::parse(ResponseParseError::CssSelectorError(message))
}

/// Split on commas that are not nested in brackets, parentheses or quotes
fn split_groups(query: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in query.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    groups.push(&query[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    groups.push(&query[start..]);

    groups
        .into_iter()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .collect()
}

fn parse_group(group: &str) -> Result<Group> {
    let (base, pseudo) = if let Some(base) = group.strip_suffix("::text") {
        if base.is_empty() || !base.ends_with(char::is_whitespace) {
            (base, Pseudo::Text)
        } else {
            (base, Pseudo::DescendantText)
        }
    } else if let Some(pos) = group.rfind("::attr(") {
        let name = group[pos + "::attr(".len()..]
            .strip_suffix(')')
            .ok_or_else(|| css_error(format!("unterminated ::attr() in {:?}", group)))?
            .trim()
            .trim_matches(|c| c == '"' || c == '\'');
        if name.is_empty() {
            return Err(css_error(format!("empty ::attr() in {:?}", group)));
        }
        (&group[..pos], Pseudo::Attr(name.to_string()))
    } else {
        (group, Pseudo::Element)
    };

    let base = base.trim();
    let selector = if base.is_empty() {
        if pseudo == Pseudo::Element {
            return Err(css_error(format!("empty selector in {:?}", group)));
        }
        None
    } else {
        Some(Selector::parse(base).map_err(|e| css_error(format!("{:?}: {}", base, e)))?)
    };

    Ok(Group { selector, pseudo })
}

/// A parsed HTML document
pub struct Document {
    html: Html,
}

impl Document {
    /// Parse a full HTML document
    pub fn parse(text: &str) -> Self {
        Self {
            html: Html::parse_document(text),
        }
    }

    /// Run a query against the whole document
    pub fn css(&self, query: &str) -> Result<SelectorList<'_>> {
        Ok(self.select(&CssQuery::parse(query)?))
    }

    /// Run a precompiled query against the whole document
    pub fn select(&self, query: &CssQuery) -> SelectorList<'_> {
        let mut items = Vec::new();
        query.apply(Scope::Document(&self.html), &mut items);
        SelectorList { items }
    }

    /// The underlying `scraper` document
    pub fn html(&self) -> &Html {
        &self.html
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").finish_non_exhaustive()
    }
}

/// One selection result: an element or an extracted string
#[derive(Debug, Clone)]
pub enum Selected<'a> {
    /// A matched element
    Element(ElementRef<'a>),
    /// Text or attribute value
    Text(String),
}

impl<'a> Selected<'a> {
    /// Stringify: outer HTML for elements, the value for text
    pub fn get(&self) -> String {
        match self {
            Selected::Element(element) => element.html(),
            Selected::Text(text) => text.clone(),
        }
    }

    /// Run a query relative to this element. Text results have no children.
    pub fn css(&self, query: &str) -> Result<SelectorList<'a>> {
        Ok(self.select(&CssQuery::parse(query)?))
    }

    /// Run a precompiled query relative to this element
    pub fn select(&self, query: &CssQuery) -> SelectorList<'a> {
        let mut items = Vec::new();
        if let Selected::Element(element) = self {
            query.apply(Scope::Element(*element), &mut items);
        }
        SelectorList { items }
    }

    /// The element, if this result is one
    pub fn element(&self) -> Option<ElementRef<'a>> {
        match self {
            Selected::Element(element) => Some(*element),
            Selected::Text(_) => None,
        }
    }
}

/// Ordered results of a query
#[derive(Debug, Clone, Default)]
pub struct SelectorList<'a> {
    items: Vec<Selected<'a>>,
}

impl<'a> SelectorList<'a> {
    /// First result, stringified
    pub fn get(&self) -> Option<String> {
        self.items.first().map(Selected::get)
    }

    /// All results, stringified
    pub fn getall(&self) -> Vec<String> {
        self.items.iter().map(Selected::get).collect()
    }

    /// Run a query relative to every element in this list
    pub fn css(&self, query: &str) -> Result<SelectorList<'a>> {
        Ok(self.select(&CssQuery::parse(query)?))
    }

    /// Run a precompiled query relative to every element in this list
    pub fn select(&self, query: &CssQuery) -> SelectorList<'a> {
        let mut items = Vec::new();
        for item in &self.items {
            if let Selected::Element(element) = item {
                query.apply(Scope::Element(*element), &mut items);
            }
        }
        SelectorList { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Selected<'a>> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for SelectorList<'a> {
    type Item = Selected<'a>;
    type IntoIter = std::vec::IntoIter<Selected<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, 'b> IntoIterator for &'b SelectorList<'a> {
    type Item = &'b Selected<'a>;
    type IntoIter = std::slice::Iter<'b, Selected<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
