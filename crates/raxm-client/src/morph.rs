//! DOM morphing: patch a live component subtree towards freshly rendered
//! HTML while preserving nodes that did not change.
//!
//! Children are matched by key (`axm:key`, then `axm:id`, then `id`) and,
//! when unkeyed, positionally. Nested component roots are never patched by
//! their parent; a component reconciles only its own subtree.

use crate::directives;
use crate::dom::{Document, NodeId, NodeKind};
use crate::error::{ClientResult, DomError};
use crate::html::parse_fragment;
use raxm_protocol::{ComponentId, ID_ATTRIBUTE, INITIAL_DATA_ATTRIBUTE};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

const KEY_ATTRIBUTE: &str = "axm:key";
const IGNORE_ATTRIBUTE: &str = "axm:ignore";
const IGNORE_SELF_ATTRIBUTE: &str = "axm:ignore.self";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MorphReport {
    pub added: usize,
    pub removed: usize,
    pub moved: usize,
    pub updated: usize,
    pub replaced: usize,
    pub skipped: usize,
    /// Ids found on removed subtrees.
    pub removed_components: Vec<ComponentId>,
    /// Inserted elements carrying initial data.
    pub added_components: Vec<NodeId>,
    /// Root of the component after the morph; differs from the target when
    /// the root element itself had to be replaced.
    pub root: Option<NodeId>,
}

impl MorphReport {
    pub fn is_noop(&self) -> bool {
        self.added + self.removed + self.moved + self.updated + self.replaced == 0
    }
}

/// Morph the subtree rooted at `target` (the root of `component`) towards
/// `html`.
#[instrument(skip(document, html, component), fields(component_id = %component, bytes = html.len()))]
pub fn morph(
    document: &mut Document,
    target: NodeId,
    html: &str,
    component: &ComponentId,
) -> ClientResult<MorphReport> {
    let incoming = parse_fragment(html)?;
    let new_root = incoming
        .first_element_child(Document::ROOT)
        .ok_or(DomError::NoElement)?;

    let mut morpher = Morpher {
        document,
        incoming: &incoming,
        component,
        report: MorphReport::default(),
    };

    let root = if morpher.document.tag(target) == incoming.tag(new_root) {
        morpher.morph_element(target, new_root, true);
        target
    } else {
        let parent = morpher.document.parent(target).unwrap_or(Document::ROOT);
        let replacement = morpher.import(new_root);
        morpher
            .document
            .insert_before(parent, replacement, Some(target));
        morpher.discard(target);
        morpher.report.replaced += 1;
        replacement
    };

    let mut report = morpher.report;
    report.root = Some(root);
    debug!(
        added = report.added,
        removed = report.removed,
        moved = report.moved,
        updated = report.updated,
        replaced = report.replaced,
        skipped = report.skipped,
        "morph finished"
    );
    Ok(report)
}

enum Plan {
    Keep(NodeId),
    Replace(NodeId),
    Insert,
}

struct Morpher<'a> {
    document: &'a mut Document,
    incoming: &'a Document,
    component: &'a ComponentId,
    report: MorphReport,
}

impl Morpher<'_> {
    fn morph_node(&mut self, old: NodeId, new: NodeId) {
        let incoming = self.incoming;
        match incoming.kind(new) {
            NodeKind::Element(_) => self.morph_element(old, new, false),
            NodeKind::Text(text) | NodeKind::Comment(text) => {
                if self.document.set_text(old, text) {
                    self.report.updated += 1;
                }
            }
            NodeKind::Root => {}
        }
    }

    fn morph_element(&mut self, old: NodeId, new: NodeId, is_root: bool) {
        if !is_root && self.is_nested_component(old) {
            self.report.skipped += 1;
            return;
        }
        if self.document.is_equal_node(old, self.incoming, new) {
            self.report.skipped += 1;
            return;
        }
        if self.document.has_attr(old, IGNORE_ATTRIBUTE) {
            self.report.skipped += 1;
            return;
        }
        let model_bound = directives::model(self.document, old).is_some();
        if model_bound && self.document.focused() == Some(old) {
            self.report.skipped += 1;
            return;
        }

        if !self.document.has_attr(old, IGNORE_SELF_ATTRIBUTE) && self.sync_attributes(old, new) {
            self.report.updated += 1;
            if matches!(
                self.document.tag(old),
                Some("input" | "textarea" | "select")
            ) {
                self.document.reset_value(old);
            }
        }

        let model_select = model_bound && self.document.tag(old) == Some("select");
        if model_select {
            self.document.set_selected_index(old, -1);
        }
        self.morph_children(old, new);
        if model_select {
            self.document.recompute_selected_index(old);
        }
    }

    fn is_nested_component(&self, node: NodeId) -> bool {
        self.document
            .attr(node, ID_ATTRIBUTE)
            .is_some_and(|id| id != self.component.as_str())
    }

    /// Returns whether anything changed.
    fn sync_attributes(&mut self, old: NodeId, new: NodeId) -> bool {
        let incoming = self.incoming;
        let Some(wanted) = incoming.element(new) else {
            return false;
        };
        let mut changed = false;
        for (name, value) in &wanted.attrs {
            changed |= self.document.set_attr(old, name, value);
        }
        let stale: Vec<String> = self
            .document
            .element(old)
            .map(|element| {
                element
                    .attrs
                    .keys()
                    .filter(|name| !wanted.attrs.contains_key(*name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for name in stale {
            changed |= self.document.remove_attr(old, &name);
        }
        changed
    }

    fn morph_children(&mut self, old_parent: NodeId, new_parent: NodeId) {
        let old_children = self.document.children(old_parent).to_vec();
        let new_children = self.incoming.children(new_parent).to_vec();

        let keyed: HashMap<String, NodeId> = old_children
            .iter()
            .filter_map(|child| key_of(self.document, *child).map(|key| (key.to_owned(), *child)))
            .collect();

        let mut used = HashSet::new();
        let mut cursor = 0;
        let mut plans = Vec::with_capacity(new_children.len());
        for new_child in &new_children {
            let plan = match key_of(self.incoming, *new_child) {
                Some(key) => match keyed.get(key).filter(|old| !used.contains(*old)) {
                    Some(old) if self.compatible(*old, *new_child) => Plan::Keep(*old),
                    Some(old) => Plan::Replace(*old),
                    None => Plan::Insert,
                },
                None => {
                    while cursor < old_children.len()
                        && (used.contains(&old_children[cursor])
                            || key_of(self.document, old_children[cursor]).is_some())
                    {
                        cursor += 1;
                    }
                    match old_children.get(cursor) {
                        Some(old) if self.compatible(*old, *new_child) => {
                            cursor += 1;
                            Plan::Keep(*old)
                        }
                        _ => Plan::Insert,
                    }
                }
            };
            if let Plan::Keep(old) | Plan::Replace(old) = plan {
                used.insert(old);
            }
            plans.push(plan);
        }

        for old in old_children.iter().filter(|old| !used.contains(*old)) {
            self.discard(*old);
            self.report.removed += 1;
        }

        let mut previous: Option<NodeId> = None;
        for (new_child, plan) in new_children.iter().zip(plans) {
            let expected = self.next_slot(old_parent, previous);
            let placed = match plan {
                Plan::Keep(old) => {
                    if Some(old) != expected {
                        self.document.insert_before(old_parent, old, expected);
                        self.report.moved += 1;
                    }
                    self.morph_node(old, *new_child);
                    old
                }
                Plan::Replace(old) => {
                    let node = self.import(*new_child);
                    self.document.insert_before(old_parent, node, Some(old));
                    self.discard(old);
                    self.report.replaced += 1;
                    node
                }
                Plan::Insert => {
                    let node = self.import(*new_child);
                    self.document.insert_before(old_parent, node, expected);
                    self.report.added += 1;
                    node
                }
            };
            previous = Some(placed);
        }
    }

    /// Node that should follow `previous` under `parent`.
    fn next_slot(&self, parent: NodeId, previous: Option<NodeId>) -> Option<NodeId> {
        let children = self.document.children(parent);
        match previous {
            None => children.first().copied(),
            Some(previous) => children
                .iter()
                .position(|child| *child == previous)
                .and_then(|index| children.get(index + 1))
                .copied(),
        }
    }

    fn compatible(&self, old: NodeId, new: NodeId) -> bool {
        if self.is_nested_component(old) {
            return true;
        }
        match (self.document.kind(old), self.incoming.kind(new)) {
            (NodeKind::Element(left), NodeKind::Element(right)) => left.tag == right.tag,
            (NodeKind::Text(_), NodeKind::Text(_)) | (NodeKind::Comment(_), NodeKind::Comment(_)) => {
                true
            }
            _ => false,
        }
    }

    /// Copy an incoming subtree into the live document and note any
    /// component roots it brings along.
    fn import(&mut self, new: NodeId) -> NodeId {
        let node = self.document.import(self.incoming, new);
        let document = &*self.document;
        self.report.added_components.extend(
            document
                .descendants(node)
                .into_iter()
                .filter(|id| document.has_attr(*id, INITIAL_DATA_ATTRIBUTE)),
        );
        node
    }

    /// Detach a live subtree and note the component ids inside it.
    fn discard(&mut self, old: NodeId) {
        let document = &*self.document;
        self.report.removed_components.extend(
            document
                .descendants(old)
                .into_iter()
                .filter_map(|id| document.attr(id, ID_ATTRIBUTE))
                .filter(|id| *id != self.component.as_str())
                .map(ComponentId::from),
        );
        self.document.detach(old);
    }
}

fn key_of(document: &Document, node: NodeId) -> Option<&str> {
    [KEY_ATTRIBUTE, ID_ATTRIBUTE, "id"]
        .into_iter()
        .find_map(|attr| document.attr(node, attr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(html: &str) -> (Document, NodeId) {
        let document = parse_fragment(html).unwrap();
        let root = document.first_element_child(Document::ROOT).unwrap();
        (document, root)
    }

    fn me() -> ComponentId {
        ComponentId::from("me")
    }

    #[test]
    fn morphing_into_the_same_html_changes_nothing() {
        let html = r#"<div axm:id="me"><ul><li axm:key="a">A</li><li>B</li></ul><input value="x"></div>"#;
        let (mut document, root) = live(html);
        let report = morph(&mut document, root, html, &me()).unwrap();
        assert!(report.is_noop());
        assert_eq!(document.outer_html(root), html);
    }

    #[test]
    fn text_change_updates_only_the_text_node() {
        let (mut document, root) = live(r#"<div axm:id="me"><span>1</span> Clicks</div>"#);
        let span = document.children(root)[0];
        let report = morph(
            &mut document,
            root,
            r#"<div axm:id="me"><span>2</span> Clicks</div>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.added + report.removed + report.moved, 0);
        assert_eq!(document.children(root)[0], span);
        assert_eq!(document.text_content(root), "2 Clicks");
    }

    #[test]
    fn keyed_reorder_moves_nodes() {
        let (mut document, root) = live(
            r#"<ul axm:id="me"><li axm:key="a">A</li><li axm:key="b">B</li><li axm:key="c">C</li></ul>"#,
        );
        let before = document.children(root).to_vec();
        let report = morph(
            &mut document,
            root,
            r#"<ul axm:id="me"><li axm:key="c">C</li><li axm:key="a">A</li><li axm:key="b">B</li></ul>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(report.moved, 1);
        assert_eq!(report.added + report.removed, 0);
        assert_eq!(document.children(root), &[before[2], before[0], before[1]]);
    }

    #[test]
    fn removal_and_insertion() {
        let (mut document, root) =
            live(r#"<ul axm:id="me"><li axm:key="a">A</li><li axm:key="b">B</li></ul>"#);
        let report = morph(
            &mut document,
            root,
            r#"<ul axm:id="me"><li axm:key="b">B</li><li axm:key="z">Z</li></ul>"#,
            &me(),
        )
        .unwrap();
        assert_eq!((report.added, report.removed, report.moved), (1, 1, 0));
        assert_eq!(document.text_content(root), "BZ");
    }

    #[test]
    fn ignored_subtree_is_untouched() {
        let (mut document, root) = live(
            r#"<div axm:id="me"><div axm:ignore><b>3rd party</b></div><p class="a">x</p></div>"#,
        );
        let report = morph(
            &mut document,
            root,
            r#"<div axm:id="me"><div axm:ignore><i>server</i></div><p class="b">x</p></div>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(report.updated, 1);
        assert!(document.outer_html(root).contains("<b>3rd party</b>"));
        assert!(document.outer_html(root).contains(r#"class="b""#));
    }

    #[test]
    fn ignore_self_keeps_attributes_but_patches_children() {
        let (mut document, root) = live(
            r#"<div axm:id="me"><div axm:ignore.self data-open="yes"><span>1</span></div></div>"#,
        );
        morph(
            &mut document,
            root,
            r#"<div axm:id="me"><div axm:ignore.self><span>2</span></div></div>"#,
            &me(),
        )
        .unwrap();
        let inner = document.children(root)[0];
        assert_eq!(document.attr(inner, "data-open"), Some("yes"));
        assert_eq!(document.text_content(inner), "2");
    }

    #[test]
    fn nested_component_survives_parent_morph() {
        let (mut document, root) = live(
            r#"<div axm:id="me"><h1>Rows</h1><li axm:id="child"><b>owned by child</b></li></div>"#,
        );
        let child = document.children(root)[1];
        let report = morph(
            &mut document,
            root,
            r#"<div axm:id="me"><h1>Rows!</h1><div axm:id="child"></div></div>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(document.children(root)[1], child);
        assert_eq!(document.tag(child), Some("li"));
        assert!(document.outer_html(child).contains("owned by child"));
        assert!(report.removed_components.is_empty());
    }

    #[test]
    fn dropped_children_and_new_components_are_reported() {
        let (mut document, root) =
            live(r#"<div axm:id="me"><section axm:id="old"><p>x</p></section></div>"#);
        let report = morph(
            &mut document,
            root,
            r#"<div axm:id="me"><section axm:id="new" axm:initial-data="{}"></section></div>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(report.removed_components, vec![ComponentId::from("old")]);
        assert_eq!(report.added_components.len(), 1);
        let added = report.added_components[0];
        assert_eq!(document.attr(added, ID_ATTRIBUTE), Some("new"));
        assert!(document.is_attached(added));
    }

    #[test]
    fn focused_model_input_is_exempt() {
        let (mut document, root) =
            live(r#"<form axm:id="me"><input axm:model="name" value="a"></form>"#);
        let input = document.children(root)[0];
        document.focus(input);
        document.set_value(input, "typing");

        let report = morph(
            &mut document,
            root,
            r#"<form axm:id="me"><input axm:model="name" value="server"></form>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(document.value(input).as_deref(), Some("typing"));

        document.blur();
        morph(
            &mut document,
            root,
            r#"<form axm:id="me"><input axm:model="name" value="server"></form>"#,
            &me(),
        )
        .unwrap();
        assert_eq!(document.value(input).as_deref(), Some("server"));
    }

    #[test]
    fn model_select_follows_selected_option() {
        let (mut document, root) = live(concat!(
            r#"<div axm:id="me"><select axm:model="size">"#,
            r#"<option value="s">S</option><option value="m">M</option></select></div>"#
        ));
        let select = document.children(root)[0];
        document.set_value(select, "s");
        morph(
            &mut document,
            root,
            concat!(
                r#"<div axm:id="me"><select axm:model="size">"#,
                r#"<option value="s">S</option><option value="m" selected>M</option></select></div>"#
            ),
            &me(),
        )
        .unwrap();
        assert_eq!(document.selected_index(select), Some(1));
        assert_eq!(document.value(select).as_deref(), Some("m"));
    }

    #[test]
    fn root_tag_change_replaces_the_root() {
        let (mut document, root) = live(r#"<div axm:id="me">a</div>"#);
        let report = morph(&mut document, root, r#"<section axm:id="me">b</section>"#, &me()).unwrap();
        let new_root = report.root.unwrap();
        assert_ne!(new_root, root);
        assert_eq!(report.replaced, 1);
        assert!(!document.is_attached(root));
        assert_eq!(document.inner_html(Document::ROOT), r#"<section axm:id="me">b</section>"#);
    }

    #[test]
    fn html_without_an_element_is_rejected() {
        let (mut document, root) = live(r#"<div axm:id="me"></div>"#);
        assert!(morph(&mut document, root, "just text", &me()).is_err());
    }
}
