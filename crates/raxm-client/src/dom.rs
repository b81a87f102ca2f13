//! Arena-backed DOM model.
//!
//! Nodes are never freed; a detached node simply loses its parent. Node ids
//! are only meaningful for the [`Document`] that created them.

use crate::html;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: IndexMap<String, String>,
    /// Live value of a form control once it diverges from its markup.
    pub value: Option<String>,
    /// Live `selectedIndex` of a `select`; `-1` selects nothing.
    pub selected_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    focused: Option<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
            focused: None,
        }
    }

    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.tag.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)
            .and_then(|element| element.attrs.get(name))
            .map(String::as_str)
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    /// Returns whether the attribute changed.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let Some(element) = self.element_mut(id) else {
            return false;
        };
        if element.attrs.get(name).map(String::as_str) == Some(value) {
            return false;
        }
        element.attrs.insert(name.to_owned(), value.to_owned());
        true
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> bool {
        self.element_mut(id)
            .is_some_and(|element| element.attrs.shift_remove(name).is_some())
    }

    /// Character data of a text or comment node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) | NodeKind::Comment(text) => Some(text),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) -> bool {
        match &mut self.nodes[id.0].kind {
            NodeKind::Text(text) | NodeKind::Comment(text) if text.as_str() != value => {
                value.clone_into(text);
                true
            }
            _ => false,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|child| self.is_element(*child))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(Element {
            tag: tag.to_ascii_lowercase(),
            ..Element::default()
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_owned()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_owned()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Move `child` under `parent`, before `reference` or at the end.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.unlink(child);
        let siblings = &mut self.nodes[parent.0].children;
        let index = reference
            .and_then(|reference| siblings.iter().position(|sibling| *sibling == reference))
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    fn unlink(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
    }

    /// Remove a subtree from the tree. Focus inside it is dropped.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(focused) = self.focused
            && self.contains(id, focused)
        {
            self.focused = None;
        }
        self.unlink(id);
    }

    /// Deep copy of `id` from `source`, returned detached.
    pub fn import(&mut self, source: &Document, id: NodeId) -> NodeId {
        let copy = self.push(source.kind(id).clone());
        for child in source.children(id) {
            let child_copy = self.import(source, *child);
            self.append_child(copy, child_copy);
        }
        copy
    }

    /// Pre-order walk starting at (and including) `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Parents of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// `node` is `ancestor` or lies inside it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor || self.ancestors(node).contains(&ancestor)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(Self::ROOT, id)
    }

    /// First element at or below `from` whose attribute `name` equals `value`.
    pub fn find_by_attr(&self, from: NodeId, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(from)
            .into_iter()
            .find(|id| self.attr(*id, name) == Some(value))
    }

    /// Structural equality across documents: tag, attributes (in any order),
    /// character data and children. Live form state is not compared.
    pub fn is_equal_node(&self, id: NodeId, other: &Document, other_id: NodeId) -> bool {
        let same_kind = match (self.kind(id), other.kind(other_id)) {
            (NodeKind::Element(left), NodeKind::Element(right)) => {
                left.tag == right.tag
                    && left.attrs.len() == right.attrs.len()
                    && left
                        .attrs
                        .iter()
                        .all(|(name, value)| right.attrs.get(name) == Some(value))
            }
            (NodeKind::Text(left), NodeKind::Text(right))
            | (NodeKind::Comment(left), NodeKind::Comment(right)) => left == right,
            (NodeKind::Root, NodeKind::Root) => true,
            _ => false,
        };
        let left = self.children(id);
        let right = other.children(other_id);
        same_kind
            && left.len() == right.len()
            && left
                .iter()
                .zip(right)
                .all(|(left, right)| self.is_equal_node(*left, other, *right))
    }

    pub fn focus(&mut self, id: NodeId) {
        self.focused = Some(id);
    }

    pub fn blur(&mut self) {
        self.focused = None;
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|node| match self.kind(node) {
                NodeKind::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Current value of a form control: the live value when the user changed
    /// it, the markup otherwise.
    pub fn value(&self, id: NodeId) -> Option<String> {
        let element = self.element(id)?;
        if let Some(value) = &element.value {
            return Some(value.clone());
        }
        match element.tag.as_str() {
            "textarea" => Some(self.text_content(id)),
            "select" => {
                let options = self.options(id);
                let index = match element.selected_index {
                    Some(index) => usize::try_from(index).ok(),
                    None => self.default_selected_index(&options),
                }?;
                options.get(index).map(|option| self.option_value(*option))
            }
            _ => element.attrs.get("value").cloned(),
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: impl Into<String>) {
        let value = value.into();
        if self.tag(id) == Some("select") {
            let options = self.options(id);
            let index = options
                .iter()
                .position(|option| self.option_value(*option) == value)
                .and_then(|index| i64::try_from(index).ok())
                .unwrap_or(-1);
            if let Some(element) = self.element_mut(id) {
                element.selected_index = Some(index);
            }
            return;
        }
        if let Some(element) = self.element_mut(id) {
            element.value = Some(value);
        }
    }

    /// Forget the live value so the control follows its markup again.
    pub fn reset_value(&mut self, id: NodeId) {
        if let Some(element) = self.element_mut(id) {
            element.value = None;
        }
    }

    pub fn selected_index(&self, id: NodeId) -> Option<i64> {
        let element = self.element(id)?;
        if element.tag != "select" {
            return None;
        }
        Some(element.selected_index.unwrap_or_else(|| {
            self.default_selected_index(&self.options(id))
                .and_then(|index| i64::try_from(index).ok())
                .unwrap_or(-1)
        }))
    }

    pub fn set_selected_index(&mut self, id: NodeId, index: i64) {
        if let Some(element) = self.element_mut(id) {
            element.selected_index = Some(index);
            element.value = None;
        }
    }

    /// Recompute `selectedIndex` from the `selected` attributes.
    pub fn recompute_selected_index(&mut self, id: NodeId) {
        let options = self.options(id);
        let index = self
            .default_selected_index(&options)
            .and_then(|index| i64::try_from(index).ok())
            .unwrap_or(-1);
        self.set_selected_index(id, index);
    }

    fn options(&self, select: NodeId) -> Vec<NodeId> {
        self.descendants(select)
            .into_iter()
            .filter(|node| self.tag(*node) == Some("option"))
            .collect()
    }

    fn default_selected_index(&self, options: &[NodeId]) -> Option<usize> {
        if options.is_empty() {
            return None;
        }
        Some(
            options
                .iter()
                .position(|option| self.has_attr(*option, "selected"))
                .unwrap_or(0),
        )
    }

    fn option_value(&self, option: NodeId) -> String {
        self.attr(option, "value")
            .map(str::to_owned)
            .unwrap_or_else(|| self.text_content(option).trim().to_owned())
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        html::write_node(self, id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            html::write_node(self, *child, &mut out);
        }
        out
    }
}
