//! Owned, mutable markdown document tree.
//!
//! `pulldown-cmark` produces a flat stream of `Start`/`End`-bracketed events.
//! The build needs a tree instead: metadata extraction walks it depth-first
//! looking for raw HTML blocks and then cuts the metadata block out before the
//! body is rendered. [`Document::parse`] folds the event stream into [`Node`]s
//! (containers hold their children, everything else is a leaf) and
//! [`Document::events`] flattens it back so the stock HTML writer can render it.
//!
//! ```text
//! Start(Paragraph) Text("hi") End(Paragraph)   ⇄   Container(Paragraph)
//!                                                   └── Leaf(Text("hi"))
//! ```

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// Markdown extensions enabled for every document.
///
/// Smart punctuation stays off: the rendered body is executed as a template,
/// and curly quotes inside `{{ ... }}` would break string literals.
fn parser_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A `Start(tag)` … `End` pair and everything between.
    Container(Tag<'static>),
    /// Any event that does not open a container.
    Leaf(Event<'static>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
    /// The `End` event that closed a container.
    end: Option<TagEnd>,
}

/// Which side of a container the walker is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Enter,
    Exit,
}

/// Returned by a walk visitor to steer the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    Continue,
    /// Do not descend into this node; carry on with its next sibling.
    SkipChildren,
    /// Stop the whole walk.
    Terminate,
}

impl Node {
    fn container(tag: Tag<'static>) -> Self {
        Self {
            kind: NodeKind::Container(tag),
            children: Vec::new(),
            end: None,
        }
    }

    fn leaf(event: Event<'static>) -> Self {
        Self {
            kind: NodeKind::Leaf(event),
            children: Vec::new(),
            end: None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    /// A raw HTML block (`<div>…`, `<!-- … -->`) at block level.
    pub fn is_html_block(&self) -> bool {
        matches!(self.kind, NodeKind::Container(Tag::HtmlBlock))
    }

    /// Language of a fenced code block, `Some("")` for unlabelled or
    /// indented blocks, `None` if this is not a code block.
    pub fn code_block_lang(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Container(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                Some(lang.split_whitespace().next().unwrap_or(""))
            }
            NodeKind::Container(Tag::CodeBlock(CodeBlockKind::Indented)) => Some(""),
            _ => None,
        }
    }

    /// Concatenated raw text of this node's direct leaf children.
    ///
    /// For an HTML block this is the block's literal source, for a code block
    /// its code.
    pub fn literal(&self) -> String {
        let mut literal = String::new();
        for child in &self.children {
            if let NodeKind::Leaf(Event::Html(text) | Event::Text(text)) = &child.kind {
                literal.push_str(text);
            }
        }
        literal
    }
}

/// A parsed markdown document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn parse(source: &str) -> Self {
        let mut stack: Vec<Node> = Vec::new();
        let mut roots: Vec<Node> = Vec::new();

        for event in Parser::new_ext(source, parser_options()) {
            match event.into_static() {
                Event::Start(tag) => stack.push(Node::container(tag)),
                Event::End(end) => {
                    if let Some(mut node) = stack.pop() {
                        node.end = Some(end);
                        attach(&mut stack, &mut roots, node);
                    }
                }
                other => attach(&mut stack, &mut roots, Node::leaf(other)),
            }
        }
        // pulldown-cmark always balances Start/End; close anything left open anyway.
        while let Some(node) = stack.pop() {
            attach(&mut stack, &mut roots, node);
        }

        Self { nodes: roots }
    }

    /// Top-level nodes in document order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first walk in document order.
    ///
    /// The visitor receives the path of child indices from the root to the
    /// node, the node, and whether it is being entered or exited. Leaves are
    /// only entered.
    pub fn walk<F>(&self, mut visitor: F)
    where
        F: FnMut(&[usize], &Node, Visit) -> WalkStatus,
    {
        let mut path = Vec::new();
        walk_nodes(&self.nodes, &mut path, &mut visitor);
    }

    /// Unlink the node at `path`, together with its subtree.
    ///
    /// Returns `None`, leaving the tree untouched, if nothing lives there.
    pub fn remove(&mut self, path: &[usize]) -> Option<Node> {
        let (last, parents) = path.split_last()?;
        let siblings = if parents.is_empty() {
            &mut self.nodes
        } else {
            let (first, rest) = parents.split_first()?;
            let mut node = self.nodes.get_mut(*first)?;
            for &i in rest {
                node = node.children.get_mut(i)?;
            }
            &mut node.children
        };
        if *last < siblings.len() {
            Some(siblings.remove(*last))
        } else {
            None
        }
    }

    /// Flatten the tree back into the event stream it was parsed from.
    pub fn events(&self) -> Vec<Event<'static>> {
        self.events_with(|_| None)
    }

    /// Flatten the tree, letting `replace` substitute the events of any node.
    ///
    /// `replace` is offered every node in document order; returning `Some`
    /// emits the given events in place of that node and its subtree.
    pub fn events_with<F>(&self, mut replace: F) -> Vec<Event<'static>>
    where
        F: FnMut(&Node) -> Option<Vec<Event<'static>>>,
    {
        let mut out = Vec::new();
        for node in &self.nodes {
            push_node_with(node, &mut replace, &mut out);
        }
        out
    }
}

fn attach(stack: &mut [Node], roots: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Returns true if the walk was terminated.
fn walk_nodes<F>(nodes: &[Node], path: &mut Vec<usize>, visitor: &mut F) -> bool
where
    F: FnMut(&[usize], &Node, Visit) -> WalkStatus,
{
    for (i, node) in nodes.iter().enumerate() {
        path.push(i);
        let terminated = match visitor(path, node, Visit::Enter) {
            WalkStatus::Terminate => true,
            WalkStatus::SkipChildren => false,
            WalkStatus::Continue => {
                walk_nodes(&node.children, path, visitor)
                    || (node.is_container()
                        && visitor(path, node, Visit::Exit) == WalkStatus::Terminate)
            }
        };
        path.pop();
        if terminated {
            return true;
        }
    }
    false
}

fn push_node_with<F>(node: &Node, replace: &mut F, out: &mut Vec<Event<'static>>)
where
    F: FnMut(&Node) -> Option<Vec<Event<'static>>>,
{
    if let Some(events) = replace(node) {
        out.extend(events);
        return;
    }
    match &node.kind {
        NodeKind::Leaf(event) => out.push(event.clone()),
        NodeKind::Container(tag) => {
            out.push(Event::Start(tag.clone()));
            for child in &node.children {
                push_node_with(child, replace, out);
            }
            if let Some(end) = node.end {
                out.push(Event::End(end));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulldown_cmark::html;

    fn to_html(events: Vec<Event<'static>>) -> String {
        let mut out = String::new();
        html::push_html(&mut out, events.into_iter());
        out
    }

    fn direct_html(source: &str) -> String {
        let mut out = String::new();
        html::push_html(&mut out, Parser::new_ext(source, parser_options()));
        out
    }

    const SAMPLE: &str = "# Title\n\nSome *text* here.\n\n<!--meta\ntitle: X\n-->\n\n- one\n- two\n";

    #[test]
    fn parse_builds_top_level_blocks() {
        let doc = Document::parse(SAMPLE);
        // heading, paragraph, html block, list
        assert_eq!(doc.nodes().len(), 4);
        assert!(doc.nodes()[0].is_container());
        assert!(doc.nodes()[2].is_html_block());
    }

    #[test]
    fn events_round_trip_to_same_html() {
        let doc = Document::parse(SAMPLE);
        assert_eq!(to_html(doc.events()), direct_html(SAMPLE));
    }

    #[test]
    fn html_block_literal_is_joined_source() {
        let doc = Document::parse(SAMPLE);
        assert_eq!(doc.nodes()[2].literal(), "<!--meta\ntitle: X\n-->\n");
    }

    #[test]
    fn code_block_lang() {
        let doc = Document::parse("```rust ignore\nfn main() {}\n```\n\n    indented\n");
        assert_eq!(doc.nodes()[0].code_block_lang(), Some("rust"));
        assert_eq!(doc.nodes()[0].literal(), "fn main() {}\n");
        assert_eq!(doc.nodes()[1].code_block_lang(), Some(""));
    }

    #[test]
    fn walk_visits_in_document_order_with_exit() {
        let doc = Document::parse("a *b*\n");
        let mut seen = Vec::new();
        doc.walk(|path, node, visit| {
            let label = match &node.kind {
                NodeKind::Container(Tag::Paragraph) => "p",
                NodeKind::Container(Tag::Emphasis) => "em",
                NodeKind::Leaf(Event::Text(_)) => "text",
                _ => "other",
            };
            seen.push((path.to_vec(), label, visit));
            WalkStatus::Continue
        });
        assert_eq!(
            seen,
            vec![
                (vec![0], "p", Visit::Enter),
                (vec![0, 0], "text", Visit::Enter),
                (vec![0, 1], "em", Visit::Enter),
                (vec![0, 1, 0], "text", Visit::Enter),
                (vec![0, 1], "em", Visit::Exit),
                (vec![0], "p", Visit::Exit),
            ]
        );
    }

    #[test]
    fn walk_skip_children_and_terminate() {
        let doc = Document::parse("first *x*\n\nsecond\n\nthird\n");
        let mut entered = 0;
        doc.walk(|path, _, visit| {
            if visit == Visit::Enter {
                entered += 1;
            }
            match path {
                [0] => WalkStatus::SkipChildren,
                [1, ..] if visit == Visit::Exit => WalkStatus::Terminate,
                _ => WalkStatus::Continue,
            }
        });
        // first paragraph (children skipped), second paragraph, its text
        assert_eq!(entered, 3);
    }

    #[test]
    fn remove_unlinks_subtree() {
        let mut doc = Document::parse(SAMPLE);
        let removed = doc.remove(&[2]).unwrap();
        assert!(removed.is_html_block());
        assert_eq!(doc.nodes().len(), 3);
        assert!(!to_html(doc.events()).contains("<!--meta"));
    }

    #[test]
    fn remove_nested_node() {
        let mut doc = Document::parse("a *b* c\n");
        let removed = doc.remove(&[0, 1]).unwrap();
        assert_eq!(removed.kind, NodeKind::Container(Tag::Emphasis));
        assert_eq!(to_html(doc.events()), "<p>a  c</p>\n");
    }

    #[test]
    fn remove_missing_path_is_noop() {
        let mut doc = Document::parse("only\n");
        let before = doc.clone();
        assert!(doc.remove(&[5]).is_none());
        assert!(doc.remove(&[0, 3, 1]).is_none());
        assert!(doc.remove(&[]).is_none());
        assert_eq!(doc, before);
    }

    #[test]
    fn events_with_replaces_node() {
        let doc = Document::parse("```\ncode\n```\n\ntext\n");
        let events = doc.events_with(|node| {
            node.code_block_lang()
                .map(|_| vec![Event::Html("<pre>CODE</pre>\n".into())])
        });
        let html = to_html(events);
        assert!(html.starts_with("<pre>CODE</pre>"));
        assert!(html.contains("<p>text</p>"));
    }

    #[test]
    fn empty_document() {
        let doc = Document::parse("");
        assert!(doc.is_empty());
        assert!(doc.events().is_empty());
    }
}
