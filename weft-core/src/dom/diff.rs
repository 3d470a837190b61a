//! DOM Reconciliation
//!
//! Merges an incoming tree (parsed HTML, a resolved suspense fragment, or
//! a navigation payload) into a live tree with minimal node replacement.
//! Matched nodes are updated and moved, never recreated, so embedded
//! signal graphs survive re-renders; structural differences are ordinary
//! update operations, never errors.
//!
//! The one special case is the streaming protocol's resolution marker: an
//! incoming `<script id="R:{n}">` is not inserted. It invokes the
//! injected resolve hook, which is responsible for locating the sibling
//! `<template id="U:{n}">` and promoting its content into the live tree.

use tracing::trace;

use super::node::Node;
use super::parse::parse_fragment;
use super::DomError;

/// Reconciles incoming trees into live ones.
///
/// Callers must serialize `diff` invocations per live root: two
/// overlapping passes over intersecting subtrees have no defined
/// semantics.
pub struct DomReconciler {
    resolve_hook: Box<dyn Fn(&str)>,
}

impl DomReconciler {
    /// Create a reconciler with the given suspense resolve hook. The
    /// hook receives the bare id from an incoming `<script id="R:{n}">`
    /// marker, exactly once per marker.
    pub fn new<F>(resolve_hook: F) -> Self
    where
        F: Fn(&str) + 'static,
    {
        Self {
            resolve_hook: Box::new(resolve_hook),
        }
    }

    /// Merge `incoming` into `live`, mutating `live` in place. The
    /// incoming tree is read-only and may be discarded afterwards.
    pub fn diff(&self, live: &Node, incoming: &Node) -> Result<(), DomError> {
        self.diff_node(live, incoming);
        Ok(())
    }

    /// Parse `html` and merge it into `live`. A single parsed root diffs
    /// against `live` itself; multiple roots diff as a fragment against
    /// `live`'s children. Markup yielding no nodes at all is the fatal
    /// invalid-root error.
    pub fn diff_html(&self, live: &Node, html: &str) -> Result<(), DomError> {
        let roots = parse_fragment(html);
        match roots.len() {
            0 => Err(DomError::InvalidRoot),
            1 => self.diff(live, &roots[0]),
            _ => {
                self.diff_children(live, &roots);
                Ok(())
            }
        }
    }

    fn diff_node(&self, live: &Node, incoming: &Node) {
        if live.same_node(incoming) {
            return;
        }

        let live_is_element = live.is_element();
        let incoming_is_element = incoming.is_element();

        // Different node types, or different tags: replace wholesale.
        if live_is_element != incoming_is_element
            || (live_is_element && live.tag() != incoming.tag())
        {
            trace!(
                live = ?live.tag(),
                incoming = ?incoming.tag(),
                "replacing node wholesale"
            );
            live.replace_data_from(incoming);
            return;
        }

        if !live_is_element {
            // Text: update in place only when different, preserving node
            // identity so focus/selection elsewhere is undisturbed.
            let text = incoming.node_value().unwrap_or_default();
            if live.node_value().as_deref() != Some(text.as_str()) {
                live.set_node_value(&text);
            }
            return;
        }

        self.diff_attrs(live, incoming);
        self.diff_children(live, &incoming.children());
    }

    /// Union-diff the attribute maps: names only on `live` are removed,
    /// names on `incoming` with a different or absent live value are set.
    /// Namespaced names (`xlink:href` and friends) are ordinary keys.
    fn diff_attrs(&self, live: &Node, incoming: &Node) {
        let live_attrs = live.attrs();
        let incoming_attrs = incoming.attrs();

        for name in live_attrs.keys() {
            if !incoming_attrs.contains_key(name) {
                live.remove_attr(name);
            }
        }
        for (name, value) in &incoming_attrs {
            if live_attrs.get(name) != Some(value) {
                live.set_attr(name, value);
            }
        }
    }

    /// Reconcile `live`'s child list against `incoming_children`.
    ///
    /// Match precedence per incoming child: explicit `key` attribute,
    /// then explicit `id` attribute, then position. Matched live nodes
    /// are moved to their new position and diffed in place; unmatched
    /// live children are removed; unmatched incoming children are
    /// inserted as structural copies.
    fn diff_children(&self, live: &Node, incoming_children: &[Node]) {
        let old = live.children();
        let mut used = vec![false; old.len()];
        let mut next: Vec<Node> = Vec::with_capacity(incoming_children.len());

        for (index, incoming) in incoming_children.iter().enumerate() {
            if let Some(id) = resolution_marker(incoming) {
                // Streaming-protocol hand-off: never insert the literal
                // script node.
                trace!(id = %id, "suspense resolution marker");
                (self.resolve_hook)(&id);
                continue;
            }

            match self.claim_match(&old, &mut used, incoming, index) {
                Some(node) => {
                    self.diff_node(&node, incoming);
                    next.push(node);
                }
                None => next.push(incoming.deep_clone()),
            }
        }

        live.set_children(next);
    }

    fn claim_match(
        &self,
        old: &[Node],
        used: &mut [bool],
        incoming: &Node,
        index: usize,
    ) -> Option<Node> {
        let found = if let Some(key) = incoming.key() {
            old.iter()
                .enumerate()
                .find(|(i, n)| !used[*i] && n.key().as_deref() == Some(key.as_str()))
                .map(|(i, _)| i)
        } else if let Some(id) = incoming.dom_id() {
            old.iter()
                .enumerate()
                .find(|(i, n)| !used[*i] && n.dom_id().as_deref() == Some(id.as_str()))
                .map(|(i, _)| i)
        } else if index < old.len()
            && !used[index]
            && old[index].key().is_none()
            && old[index].dom_id().is_none()
        {
            // Positional matches never claim a keyed/id'd live node;
            // those are reserved for their explicit matches.
            Some(index)
        } else {
            None
        };

        found.map(|i| {
            used[i] = true;
            old[i].clone()
        })
    }
}

/// If `node` is the streaming protocol's resolution marker
/// `<script id="R:{n}">`, return `n`.
fn resolution_marker(node: &Node) -> Option<String> {
    if node.tag().as_deref() != Some("script") {
        return None;
    }
    node.dom_id()
        .and_then(|id| id.strip_prefix("R:").map(|n| n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn reconciler() -> DomReconciler {
        DomReconciler::new(|_| {})
    }

    #[test]
    fn attributes_union_sets_and_removes() {
        let r = reconciler();
        let live = Node::element("div").with_attr("stale", "1").with_attr("kept", "old");
        let incoming = Node::element("div").with_attr("kept", "new").with_attr("added", "2");

        r.diff(&live, &incoming).unwrap();

        assert_eq!(live.attr("stale"), None);
        assert_eq!(live.attr("kept").as_deref(), Some("new"));
        assert_eq!(live.attr("added").as_deref(), Some("2"));
    }

    #[test]
    fn text_updates_in_place_preserving_identity() {
        let r = reconciler();
        let live = Node::element("p").with_child(Node::text("old"));
        let text_handle = live.children()[0].clone();

        r.diff_html(&live, "<p>new</p>").unwrap();

        assert!(live.children()[0].same_node(&text_handle));
        assert_eq!(text_handle.node_value().as_deref(), Some("new"));
    }

    #[test]
    fn tag_change_replaces_wholesale() {
        let r = reconciler();
        let live = Node::element("div").with_child(Node::element("span"));

        r.diff_html(&live, "<div><em>x</em></div>").unwrap();

        let child = &live.children()[0];
        assert_eq!(child.tag().as_deref(), Some("em"));
        assert_eq!(child.children()[0].node_value().as_deref(), Some("x"));
    }

    #[test]
    fn keyed_reorder_moves_nodes_without_recreating() {
        let r = reconciler();
        let live = Node::element("ul")
            .with_child(Node::element("li").with_attr("key", "x").with_child(Node::text("X")))
            .with_child(Node::element("li").with_attr("key", "y").with_child(Node::text("Y")));

        let x = live.children()[0].clone();
        let y = live.children()[1].clone();

        r.diff_html(
            &live,
            r#"<ul><li key="y">Y</li><li key="x">X</li></ul>"#,
        )
        .unwrap();

        let children = live.children();
        assert!(children[0].same_node(&y));
        assert!(children[1].same_node(&x));
    }

    #[test]
    fn moved_node_keeps_its_signal_graph_owner() {
        use crate::reactive::{SignalGraph, Store};

        let r = reconciler();
        let live = Node::element("div")
            .with_child(Node::element("x-widget").with_attr("key", "w"))
            .with_child(Node::element("p"));

        live.children()[0].set_owner(Some(SignalGraph::new(Arc::new(Store::new()))));

        r.diff_html(&live, r#"<div><p></p><x-widget key="w"></x-widget></div>"#)
            .unwrap();

        let widget = &live.children()[1];
        assert_eq!(widget.tag().as_deref(), Some("x-widget"));
        assert!(widget.has_owner());
    }

    #[test]
    fn unmatched_children_insert_and_remove() {
        let r = reconciler();
        let live = Node::element("div")
            .with_child(Node::element("span"))
            .with_child(Node::element("span"));

        r.diff_html(&live, "<div><span></span></div>").unwrap();
        assert_eq!(live.children().len(), 1);

        r.diff_html(&live, "<div><span></span><b>new</b></div>").unwrap();
        assert_eq!(live.children().len(), 2);
        assert_eq!(live.children()[1].tag().as_deref(), Some("b"));
    }

    #[test]
    fn resolution_marker_invokes_hook_without_insertion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicI32::new(0));

        let seen_clone = seen.clone();
        let calls_clone = calls.clone();
        let r = DomReconciler::new(move |id| {
            seen_clone.lock().push(id.to_string());
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let live = Node::element("body").with_child(Node::element("div"));
        r.diff_html(
            &live,
            r#"<body><div></div><script id="R:1">u$('1')</script></body>"#,
        )
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec!["1"]);
        // No literal script node was inserted.
        assert_eq!(live.children().len(), 1);
        assert_eq!(live.children()[0].tag().as_deref(), Some("div"));
    }

    #[test]
    fn ordinary_scripts_still_insert() {
        let r = reconciler();
        let live = Node::element("body");

        r.diff_html(&live, r#"<body><script id="app">boot()</script></body>"#)
            .unwrap();

        assert_eq!(live.children()[0].tag().as_deref(), Some("script"));
    }

    #[test]
    fn empty_markup_is_invalid_root() {
        let r = reconciler();
        let live = Node::element("div");

        assert!(matches!(
            r.diff_html(&live, "<!-- nothing here -->"),
            Err(DomError::InvalidRoot)
        ));
    }
}
