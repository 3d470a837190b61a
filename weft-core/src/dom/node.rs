//! DOM Tree Model
//!
//! A lightweight document tree whose node identity is handle identity:
//! a [`Node`] is a cheap cloneable handle, and two handles are the same
//! node exactly when they point at the same allocation. The reconciler
//! moves handles instead of recreating them, which is what keeps
//! embedded state alive across re-renders.
//!
//! Each element may own at most one [`SignalGraph`]: the explicit form of
//! "UI state lives inside persistent DOM nodes". The reconciler's
//! contract is to never replace a node with an owner unless its
//! tag/key/id identity changed.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::reactive::SignalGraph;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Whether `tag` is an HTML void element (no closing tag, no children).
pub(crate) fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub(crate) struct ElementData {
    pub(crate) tag: String,
    pub(crate) attrs: IndexMap<String, String>,
    pub(crate) children: Vec<Node>,
    pub(crate) owner: Option<SignalGraph>,
}

pub(crate) enum NodeData {
    Element(ElementData),
    Text(String),
}

/// A handle to one node of a document tree.
///
/// Cloning the handle does not clone the node; use [`Node::deep_clone`]
/// for a structural copy.
#[derive(Clone)]
pub struct Node {
    data: Arc<RwLock<NodeData>>,
}

impl Node {
    /// Create an element node. Tag names are normalized to lowercase.
    pub fn element(tag: &str) -> Self {
        Self::from_data(NodeData::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attrs: IndexMap::new(),
            children: Vec::new(),
            owner: None,
        }))
    }

    /// Create a text node.
    pub fn text(value: &str) -> Self {
        Self::from_data(NodeData::Text(value.to_string()))
    }

    fn from_data(data: NodeData) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Builder form of [`Node::set_attr`].
    pub fn with_attr(self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder form of [`Node::append_child`].
    pub fn with_child(self, child: Node) -> Self {
        self.append_child(child);
        self
    }

    /// Whether two handles refer to the same node.
    pub fn same_node(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn is_element(&self) -> bool {
        matches!(&*self.data.read(), NodeData::Element(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(&*self.data.read(), NodeData::Text(_))
    }

    /// The element tag name, `None` for text nodes.
    pub fn tag(&self) -> Option<String> {
        match &*self.data.read() {
            NodeData::Element(el) => Some(el.tag.clone()),
            NodeData::Text(_) => None,
        }
    }

    /// The text content, `None` for elements.
    pub fn node_value(&self) -> Option<String> {
        match &*self.data.read() {
            NodeData::Text(text) => Some(text.clone()),
            NodeData::Element(_) => None,
        }
    }

    /// Update text content in place. No-op on elements.
    pub fn set_node_value(&self, value: &str) {
        if let NodeData::Text(text) = &mut *self.data.write() {
            *text = value.to_string();
        }
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        match &*self.data.read() {
            NodeData::Element(el) => el.attrs.get(name).cloned(),
            NodeData::Text(_) => None,
        }
    }

    /// Snapshot of the attribute map in document order.
    pub fn attrs(&self) -> IndexMap<String, String> {
        match &*self.data.read() {
            NodeData::Element(el) => el.attrs.clone(),
            NodeData::Text(_) => IndexMap::new(),
        }
    }

    pub fn set_attr(&self, name: &str, value: &str) {
        if let NodeData::Element(el) = &mut *self.data.write() {
            el.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&self, name: &str) {
        if let NodeData::Element(el) = &mut *self.data.write() {
            el.attrs.shift_remove(name);
        }
    }

    /// The explicit `key` attribute used for reconciliation, if any.
    pub fn key(&self) -> Option<String> {
        self.attr("key")
    }

    /// The explicit `id` attribute, if any.
    pub fn dom_id(&self) -> Option<String> {
        self.attr("id")
    }

    /// Snapshot of child handles.
    pub fn children(&self) -> Vec<Node> {
        match &*self.data.read() {
            NodeData::Element(el) => el.children.clone(),
            NodeData::Text(_) => Vec::new(),
        }
    }

    pub fn set_children(&self, children: Vec<Node>) {
        if let NodeData::Element(el) = &mut *self.data.write() {
            el.children = children;
        }
    }

    pub fn append_child(&self, child: Node) {
        if let NodeData::Element(el) = &mut *self.data.write() {
            el.children.push(child);
        }
    }

    /// The signal graph owned by this node, if any.
    pub fn owner(&self) -> Option<SignalGraph> {
        match &*self.data.read() {
            NodeData::Element(el) => el.owner.clone(),
            NodeData::Text(_) => None,
        }
    }

    pub fn has_owner(&self) -> bool {
        matches!(&*self.data.read(), NodeData::Element(el) if el.owner.is_some())
    }

    /// Attach a signal graph to this element. The graph lives and dies
    /// with the node.
    pub fn set_owner(&self, graph: Option<SignalGraph>) {
        if let NodeData::Element(el) = &mut *self.data.write() {
            el.owner = graph;
        }
    }

    /// Structural copy with fresh handles throughout. The copy carries
    /// markup only: owned signal graphs do not transfer.
    pub fn deep_clone(&self) -> Node {
        match &*self.data.read() {
            NodeData::Text(text) => Node::text(text),
            NodeData::Element(el) => Self::from_data(NodeData::Element(ElementData {
                tag: el.tag.clone(),
                attrs: el.attrs.clone(),
                children: el.children.iter().map(|c| c.deep_clone()).collect(),
                owner: None,
            })),
        }
    }

    /// Overwrite this node's content with a structural copy of `other`,
    /// keeping the handle (and thus the parent's reference to it). Any
    /// owned signal graph is dropped: wholesale replacement is the one
    /// path allowed to destroy embedded state.
    pub(crate) fn replace_data_from(&self, other: &Node) {
        let fresh = other.deep_clone();
        let data = match Arc::try_unwrap(fresh.data) {
            Ok(lock) => lock.into_inner(),
            // The fresh clone is unshared; this arm is unreachable.
            Err(shared) => match &*shared.read() {
                NodeData::Text(text) => NodeData::Text(text.clone()),
                NodeData::Element(el) => NodeData::Element(ElementData {
                    tag: el.tag.clone(),
                    attrs: el.attrs.clone(),
                    children: el.children.clone(),
                    owner: None,
                }),
            },
        };
        *self.data.write() = data;
    }

    /// Serialize the subtree as HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match &*self.data.read() {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(value);
                    out.push('"');
                }
                out.push('>');
                if !is_void_element(&el.tag) {
                    for child in &el.children {
                        child.write_html(out);
                    }
                    out.push_str("</");
                    out.push_str(&el.tag);
                    out.push('>');
                }
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.data.read() {
            NodeData::Text(text) => f.debug_tuple("Text").field(text).finish(),
            NodeData::Element(el) => f
                .debug_struct("Element")
                .field("tag", &el.tag)
                .field("attrs", &el.attrs)
                .field("children", &el.children.len())
                .field("owner", &el.owner.is_some())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_attrs_keep_document_order() {
        let node = Node::element("div")
            .with_attr("b", "2")
            .with_attr("a", "1");

        let names: Vec<String> = node.attrs().keys().cloned().collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn handle_clone_is_same_node_deep_clone_is_not() {
        let node = Node::element("div").with_attr("key", "x");

        let handle = node.clone();
        assert!(node.same_node(&handle));

        let copy = node.deep_clone();
        assert!(!node.same_node(&copy));
        assert_eq!(copy.attr("key").as_deref(), Some("x"));
    }

    #[test]
    fn deep_clone_drops_owner() {
        use crate::reactive::Store;

        let node = Node::element("x-counter");
        node.set_owner(Some(SignalGraph::new(Arc::new(Store::new()))));
        assert!(node.has_owner());

        assert!(!node.deep_clone().has_owner());
    }

    #[test]
    fn to_html_round_trip_shapes() {
        let node = Node::element("div")
            .with_attr("class", "box")
            .with_child(Node::text("hi"))
            .with_child(Node::element("br"));

        assert_eq!(node.to_html(), r#"<div class="box">hi<br></div>"#);
    }
}
