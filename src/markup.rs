//! Thin helpers over the two markup parsers.
//!
//! XML goes through `roxmltree` (element lookups by local name, namespaces
//! ignored); HTML goes through `scraper` (visible text and table cells).

use once_cell::sync::Lazy;
use roxmltree::Node;
use scraper::{ElementRef, Html, Selector};

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

/// First element strictly below `node` with the given local name.
pub fn find_descendant<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Every element strictly below `node` with the given local name, document order.
pub fn find_descendants<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants()
        .skip(1)
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/// Follow a `/`-separated path of direct child elements (`date_range/begin`).
pub fn find_child_path<'a, 'input>(node: Node<'a, 'input>, path: &str) -> Option<Node<'a, 'input>> {
    path.split('/').try_fold(node, |current, step| {
        current
            .children()
            .find(|c| c.is_element() && c.tag_name().name() == step)
    })
}

/// Trimmed direct text of an element; `None` when empty.
pub fn element_text(node: Node<'_, '_>) -> Option<String> {
    let text = node.text()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Text of the child at `path`, if present and non-empty.
pub fn child_text(node: Node<'_, '_>, path: &str) -> Option<String> {
    find_child_path(node, path).and_then(element_text)
}

/// Text of the first descendant named `name`, if present and non-empty.
pub fn descendant_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    find_descendant(node, name).and_then(element_text)
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("valid selector"));
static TH: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("valid selector"));
static TR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td, th").expect("valid selector"));

/// Elements whose text is never rendered.
const INVISIBLE: [&str; 4] = ["script", "style", "template", "noscript"];

/// Elements rendered on lines of their own.
const BLOCK: [&str; 28] = [
    "address", "article", "blockquote", "body", "br", "dd", "div", "dl", "dt", "footer", "form",
    "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section",
    "table", "tr", "ul", "title",
];

/// Table cells; tab-separated within their row.
const CELLS: [&str; 2] = ["td", "th"];

/// Pending work of the visible-text walk.
enum Step<'a> {
    Open(ElementRef<'a>),
    Text(&'a str),
    LineBreak,
}

/// A table reduced to header labels and cell texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTable {
    /// Lower-cased, stripped text of every `th` in the table.
    pub headers: Vec<String>,
    /// Stripped cell texts of every `tr` after the first.
    pub rows: Vec<Vec<String>>,
    /// Number of `tr` elements including the first.
    pub row_count: usize,
}

impl HtmlTable {
    /// All header labels joined by spaces.
    pub fn header_line(&self) -> String {
        self.headers.join(" ")
    }
}

/// Parsed HTML document.
pub struct HtmlDocument {
    html: Html,
}

impl HtmlDocument {
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
        }
    }

    /// Text nodes outside script/style in document order.
    ///
    /// Block elements start and end a line and table cells are separated by
    /// a tab, so a value never runs on into the next element even when the
    /// source is a single line. Whitespace inside text nodes is preserved.
    pub fn visible_text(&self) -> String {
        let mut out = String::new();
        let mut pending = vec![Step::Open(self.html.root_element())];
        while let Some(step) = pending.pop() {
            match step {
                Step::Text(text) => out.push_str(text),
                Step::LineBreak => end_line(&mut out),
                Step::Open(element) => {
                    let name = element.value().name();
                    if INVISIBLE.contains(&name) {
                        continue;
                    }
                    if BLOCK.contains(&name) {
                        end_line(&mut out);
                        pending.push(Step::LineBreak);
                    } else if CELLS.contains(&name) {
                        separate_cell(&mut out);
                    }
                    for child in element.children().rev() {
                        if let Some(text) = child.value().as_text() {
                            pending.push(Step::Text(&**text));
                        } else if let Some(child) = ElementRef::wrap(child) {
                            pending.push(Step::Open(child));
                        }
                    }
                }
            }
        }
        out
    }

    pub fn tables(&self) -> Vec<HtmlTable> {
        self.html.select(&TABLE).map(reduce_table).collect()
    }
}

fn end_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn separate_cell(out: &mut String) {
    if !out.is_empty() && !out.ends_with(|c: char| c == '\n' || c == '\t') {
        out.push('\t');
    }
}

fn reduce_table(table: ElementRef<'_>) -> HtmlTable {
    let headers = table
        .select(&TH)
        .map(|th| stripped_text(th).to_lowercase())
        .collect();
    let rows: Vec<ElementRef<'_>> = table.select(&TR).collect();
    let row_count = rows.len();
    let rows = rows
        .into_iter()
        .skip(1)
        .map(|tr| tr.select(&CELL).map(stripped_text).collect())
        .collect();
    HtmlTable {
        headers,
        rows,
        row_count,
    }
}

/// Each text node trimmed, empty ones dropped, the rest concatenated.
pub fn stripped_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}
