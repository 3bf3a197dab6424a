//! The program tree (vDOM)
//!
//! A parsed program is an immutable tree of document/element/content/comment
//! nodes held in an index arena. Coroutines walk it read-only through the
//! `first_child` / `next_sibling` accessors, so one tree can be shared by any
//! number of coroutines (and across instances) behind an `Arc`.
//!
//! The markup grammar itself is a collaborator concern; the builder below is
//! the seam a parser targets, and what tests use to assemble programs.

use crate::atom::Atom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node within its [`VDom`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identity of an element tag.
///
/// Built-in operations dispatch on this; tags without specialized behavior
/// carry their interned name and fall back to the generic container ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    /// Program root element.
    Hvml,
    /// Exception handler clause.
    Catch,
    /// Dispatch anchor for `match` clauses.
    Test,
    /// Pattern clause inside a `test`.
    Match,
    /// Terminate the coroutine.
    Exit,
    /// Suspend for a duration.
    Sleep,
    /// Run children once per item of a list.
    Iterate,
    /// Fetch external content, suspending until it arrives.
    Load,
    /// Any other tag; handled by the generic container operations.
    Other(Atom),
}

impl Tag {
    /// Parse a tag name.
    pub fn parse(name: &str) -> Self {
        match name {
            "hvml" => Tag::Hvml,
            "catch" => Tag::Catch,
            "test" => Tag::Test,
            "match" => Tag::Match,
            "exit" => Tag::Exit,
            "sleep" => Tag::Sleep,
            "iterate" => Tag::Iterate,
            "load" => Tag::Load,
            other => Tag::Other(Atom::intern(other)),
        }
    }

    /// The tag's source name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Hvml => "hvml",
            Tag::Catch => "catch",
            Tag::Test => "test",
            Tag::Match => "match",
            Tag::Exit => "exit",
            Tag::Sleep => "sleep",
            Tag::Iterate => "iterate",
            Tag::Load => "load",
            Tag::Other(atom) => atom.as_str(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An element node: tag identity plus its ordered attribute list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Tag identity.
    pub tag: Tag,
    /// Attributes in document order, raw (unevaluated) text values.
    pub attrs: Vec<(String, String)>,
}

impl Element {
    /// Raw text of the named attribute, if present.
    pub fn attr_raw(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// What a node is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    /// The document root (exactly one, at index 0).
    Document,
    /// An element.
    Element(Element),
    /// Text content. Skipped by child selection after the content observer.
    Content(String),
    /// A comment. Skipped by child selection after the comment observer.
    Comment(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

/// An immutable program tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VDom {
    nodes: Vec<NodeData>,
}

impl VDom {
    /// The document node.
    pub fn document(&self) -> NodeId {
        NodeId(0)
    }

    /// The node's kind.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    /// The node's element payload, if it is an element.
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id) {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    /// First child in document order.
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].first_child
    }

    /// Next sibling in document order.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].next_sibling
    }

    /// Parent node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// Depth-first search for the element whose `id` attribute equals `id`.
    pub fn find_element_by_id(&self, id: &str) -> Option<NodeId> {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .find(|&n| match self.element(n) {
                Some(el) => el.attr_raw("id") == Some(id),
                None => false,
            })
    }

    /// The root element of the program: the document's first element child.
    pub fn root_element(&self) -> Option<NodeId> {
        let mut child = self.first_child(self.document());
        while let Some(id) = child {
            if matches!(self.kind(id), NodeKind::Element(_)) {
                return Some(id);
            }
            child = self.next_sibling(id);
        }
        None
    }
}

/// Builder used by parsers and tests to assemble a [`VDom`].
pub struct VDomBuilder {
    nodes: Vec<NodeData>,
    open: Vec<NodeId>,
}

impl VDomBuilder {
    /// Start a new tree with an empty document node.
    pub fn new() -> Self {
        let document = NodeData {
            kind: NodeKind::Document,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
        };
        VDomBuilder {
            nodes: vec![document],
            open: vec![NodeId(0)],
        }
    }

    fn append(&mut self, kind: NodeKind) -> NodeId {
        let parent = *self.open.last().expect("builder has no open node");
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            first_child: None,
            last_child: None,
            next_sibling: None,
        });
        let parent_data = &mut self.nodes[parent.index()];
        match parent_data.last_child {
            None => parent_data.first_child = Some(id),
            Some(prev) => self.nodes[prev.index()].next_sibling = Some(id),
        }
        self.nodes[parent.index()].last_child = Some(id);
        id
    }

    /// Open an element; subsequent nodes become its children until [`close`].
    ///
    /// [`close`]: VDomBuilder::close
    pub fn open(&mut self, tag: &str) -> &mut Self {
        let id = self.append(NodeKind::Element(Element {
            tag: Tag::parse(tag),
            attrs: Vec::new(),
        }));
        self.open.push(id);
        self
    }

    /// Add an attribute to the currently open element.
    ///
    /// Panics if the open node is the document (a builder misuse, not data).
    pub fn attr(&mut self, name: &str, value: &str) -> &mut Self {
        let id = *self.open.last().expect("builder has no open node");
        match &mut self.nodes[id.index()].kind {
            NodeKind::Element(el) => el.attrs.push((name.to_string(), value.to_string())),
            _ => panic!("attr() outside an open element"),
        }
        self
    }

    /// Append text content under the open element.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.append(NodeKind::Content(text.to_string()));
        self
    }

    /// Append a comment under the open element.
    pub fn comment(&mut self, text: &str) -> &mut Self {
        self.append(NodeKind::Comment(text.to_string()));
        self
    }

    /// Append an empty element (open + close).
    pub fn leaf(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.open(tag);
        for (name, value) in attrs {
            self.attr(name, value);
        }
        self.close()
    }

    /// Close the current element.
    pub fn close(&mut self) -> &mut Self {
        assert!(self.open.len() > 1, "close() would close the document");
        self.open.pop();
        self
    }

    /// Finish building.
    ///
    /// Panics if elements are still open.
    pub fn build(self) -> VDom {
        assert!(
            self.open.len() == 1,
            "unclosed elements at build(): depth {}",
            self.open.len() - 1
        );
        VDom { nodes: self.nodes }
    }
}

impl Default for VDomBuilder {
    fn default() -> Self {
        Self::new()
    }
}
