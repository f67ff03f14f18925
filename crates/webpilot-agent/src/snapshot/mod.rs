//! Accessibility snapshots: a token-efficient view of the page the model
//! reasons over by refs instead of coordinates.
//!
//! Refs are opaque strings scoped to the snapshot generation that minted
//! them (`s<generation>e<index>`); a ref from an older generation is
//! rejected as stale by the reliability fabric.

pub mod cache;

pub use cache::{RefError, SnapshotCacheConfig, SnapshotResult, SnapshotService};

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use webpilot_traits::{AxNode, BoundingBox};

/// Maximum element text carried into a snapshot.
pub const TEXT_TRUNCATE_AT: usize = 200;

/// Roles that keep a node even without an accessible name.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "option",
    "menuitem",
    "tab",
    "switch",
    "slider",
    "spinbutton",
];

/// Opaque element ref, valid only within its snapshot's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(generation: u64, index: usize) -> Self {
        Self(format!("s{generation}e{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The generation that minted this ref, `None` for malformed refs.
    pub fn generation(&self) -> Option<u64> {
        let rest = self.0.strip_prefix('s')?;
        let (generation, _) = rest.split_once('e')?;
        generation.parse().ok()
    }
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One addressable node inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub ref_: ElementRef,
    pub backend_id: u64,
    pub role: String,
    pub name: String,
    pub value: String,
    pub attributes: BTreeMap<String, String>,
    pub box_: Option<BoundingBox>,
    pub visible: bool,
    /// Nesting depth for wire rendering.
    pub depth: usize,
}

/// Accessibility view of one page at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub url: String,
    pub title: String,
    pub generation: u64,
    pub elements: Vec<Element>,
    pub captured_at: Instant,
    pub hash: u64,
}

impl Snapshot {
    /// Find an element by ref within this snapshot.
    pub fn element(&self, ref_: &ElementRef) -> Option<&Element> {
        self.elements.iter().find(|e| &e.ref_ == ref_)
    }

    /// The newline-delimited listing the model sees:
    /// `[ref] role "name" [attrs]`, children indented two spaces.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for element in &self.elements {
            for _ in 0..element.depth {
                out.push_str("  ");
            }
            out.push('[');
            out.push_str(element.ref_.as_str());
            out.push_str("] ");
            out.push_str(&element.role);
            out.push_str(" \"");
            out.push_str(&element.name);
            out.push('"');
            if !element.value.is_empty() {
                out.push_str(&format!(" value=\"{}\"", element.value));
            }
            if !element.attributes.is_empty() {
                let attrs: Vec<String> = element
                    .attributes
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                out.push_str(&format!(" [{}]", attrs.join(" ")));
            }
            out.push('\n');
        }
        out
    }
}

/// One attribute-level change between two snapshots of the same node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrChange {
    pub ref_: ElementRef,
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Delta between two snapshots. `added`/`changed` refs belong to the new
/// snapshot, `removed` refs to the old one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<ElementRef>,
    pub removed: Vec<ElementRef>,
    pub changed: Vec<AttrChange>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Filtering options for one capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SnapshotOptions {
    /// Limit the tree to the subtree matching this selector
    /// (`#id` or a role name).
    pub scope: Option<String>,
    /// Drop subtrees matching any of these selectors.
    pub exclude: Vec<String>,
    /// Return a delta against the previous snapshot for the same key.
    pub diff: bool,
    /// Bypass the cache and refresh the diff anchor.
    pub force: bool,
}

fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

fn matches_selector(node: &AxNode, selector: &str) -> bool {
    if let Some(id) = selector.strip_prefix('#') {
        node.attributes.get("id").is_some_and(|v| v == id)
    } else {
        node.role == selector
    }
}

fn is_interactive(role: &str) -> bool {
    INTERACTIVE_ROLES.contains(&role)
}

/// Build a snapshot from a raw accessibility tree.
///
/// Nodes with no accessible name, no meaningful role, and no
/// interactivity collapse away (their children are promoted to the
/// parent's depth); surviving nodes get fresh generation-scoped refs in
/// document order.
pub fn build_snapshot(
    url: &str,
    title: &str,
    tree: &AxNode,
    generation: u64,
    options: &SnapshotOptions,
) -> Snapshot {
    let mut roots: Vec<&AxNode> = Vec::new();
    if let Some(scope) = &options.scope {
        collect_scoped(tree, scope, &mut roots);
    } else {
        roots.push(tree);
    }

    let mut elements = Vec::new();
    for root in roots {
        walk(root, 0, &options.exclude, generation, &mut elements);
    }

    let mut hasher = std::hash::DefaultHasher::new();
    url.hash(&mut hasher);
    for element in &elements {
        element.backend_id.hash(&mut hasher);
        element.role.hash(&mut hasher);
        element.name.hash(&mut hasher);
        element.value.hash(&mut hasher);
    }

    Snapshot {
        url: url.to_string(),
        title: title.to_string(),
        generation,
        elements,
        captured_at: Instant::now(),
        hash: hasher.finish(),
    }
}

fn collect_scoped<'a>(node: &'a AxNode, scope: &str, out: &mut Vec<&'a AxNode>) {
    if matches_selector(node, scope) {
        out.push(node);
        return;
    }
    for child in &node.children {
        collect_scoped(child, scope, out);
    }
}

fn walk(
    node: &AxNode,
    depth: usize,
    exclude: &[String],
    generation: u64,
    out: &mut Vec<Element>,
) {
    if exclude.iter().any(|sel| matches_selector(node, sel)) {
        return;
    }

    let keep = !node.name.trim().is_empty()
        || is_interactive(&node.role)
        || (!node.role.is_empty() && !matches!(node.role.as_str(), "generic" | "none" | "group"));

    let child_depth = if keep {
        let ref_ = ElementRef::new(generation, out.len());
        out.push(Element {
            ref_,
            backend_id: node.backend_id,
            role: node.role.clone(),
            name: truncate_text(&node.name, TEXT_TRUNCATE_AT),
            value: truncate_text(&node.value, TEXT_TRUNCATE_AT),
            attributes: node.attributes.clone(),
            box_: node.box_,
            visible: node.visible,
            depth,
        });
        depth + 1
    } else {
        depth
    };

    for child in &node.children {
        walk(child, child_depth, exclude, generation, out);
    }
}

/// Compute the delta between two snapshots, matching nodes by their
/// driver backend id (refs are never comparable across snapshots).
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> SnapshotDiff {
    let old_by_id: BTreeMap<u64, &Element> =
        old.elements.iter().map(|e| (e.backend_id, e)).collect();
    let new_by_id: BTreeMap<u64, &Element> =
        new.elements.iter().map(|e| (e.backend_id, e)).collect();

    let mut diff = SnapshotDiff::default();

    for element in &new.elements {
        match old_by_id.get(&element.backend_id) {
            None => diff.added.push(element.ref_.clone()),
            Some(previous) => {
                for (field, old_val, new_val) in [
                    ("role", &previous.role, &element.role),
                    ("name", &previous.name, &element.name),
                    ("value", &previous.value, &element.value),
                ] {
                    if old_val != new_val {
                        diff.changed.push(AttrChange {
                            ref_: element.ref_.clone(),
                            field: field.to_string(),
                            old: old_val.clone(),
                            new: new_val.clone(),
                        });
                    }
                }
                if previous.attributes != element.attributes {
                    diff.changed.push(AttrChange {
                        ref_: element.ref_.clone(),
                        field: "attributes".to_string(),
                        old: format!("{:?}", previous.attributes),
                        new: format!("{:?}", element.attributes),
                    });
                }
            }
        }
    }

    for element in &old.elements {
        if !new_by_id.contains_key(&element.backend_id) {
            diff.removed.push(element.ref_.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(backend_id: u64, role: &str, name: &str, children: Vec<AxNode>) -> AxNode {
        AxNode {
            backend_id,
            role: role.to_string(),
            name: name.to_string(),
            visible: true,
            children,
            ..Default::default()
        }
    }

    fn page_tree() -> AxNode {
        node(
            1,
            "document",
            "Example",
            vec![
                node(2, "generic", "", vec![
                    node(3, "link", "One", vec![]),
                    node(4, "link", "Two", vec![]),
                ]),
                node(5, "button", "", vec![]),
                node(6, "heading", "Welcome", vec![]),
            ],
        )
    }

    #[test]
    fn refs_are_generation_scoped_and_unique() {
        let snap = build_snapshot(
            "https://a.test/",
            "Example",
            &page_tree(),
            7,
            &SnapshotOptions::default(),
        );
        let refs: Vec<&str> = snap.elements.iter().map(|e| e.ref_.as_str()).collect();
        let unique: std::collections::HashSet<&&str> = refs.iter().collect();
        assert_eq!(refs.len(), unique.len());
        for element in &snap.elements {
            assert_eq!(element.ref_.generation(), Some(7));
        }
    }

    #[test]
    fn nameless_generic_nodes_collapse() {
        let snap = build_snapshot(
            "https://a.test/",
            "Example",
            &page_tree(),
            1,
            &SnapshotOptions::default(),
        );
        // The generic container (backend 2) is gone; the nameless button
        // (backend 5) survives because its role is interactive.
        assert!(snap.elements.iter().all(|e| e.backend_id != 2));
        assert!(snap.elements.iter().any(|e| e.backend_id == 5));
    }

    #[test]
    fn collapsed_parent_promotes_children_depth() {
        let snap = build_snapshot(
            "https://a.test/",
            "Example",
            &page_tree(),
            1,
            &SnapshotOptions::default(),
        );
        let link = snap.elements.iter().find(|e| e.backend_id == 3).unwrap();
        let document = snap.elements.iter().find(|e| e.backend_id == 1).unwrap();
        assert_eq!(document.depth, 0);
        // Links sit directly under the document after the generic collapses.
        assert_eq!(link.depth, 1);
    }

    #[test]
    fn long_text_truncates_with_ellipsis() {
        let long = "x".repeat(500);
        let tree = node(1, "document", "", vec![node(2, "link", &long, vec![])]);
        let snap = build_snapshot("https://a.test/", "", &tree, 1, &SnapshotOptions::default());
        let link = snap.elements.iter().find(|e| e.backend_id == 2).unwrap();
        assert_eq!(link.name.chars().count(), TEXT_TRUNCATE_AT + 1);
        assert!(link.name.ends_with('…'));
    }

    #[test]
    fn scope_limits_to_subtree() {
        let mut form = node(10, "form", "Login", vec![node(11, "textbox", "Email", vec![])]);
        form.attributes.insert("id".to_string(), "login".to_string());
        let tree = node(1, "document", "Page", vec![node(3, "link", "Away", vec![]), form]);

        let options = SnapshotOptions {
            scope: Some("#login".to_string()),
            ..Default::default()
        };
        let snap = build_snapshot("https://a.test/", "", &tree, 1, &options);
        assert!(snap.elements.iter().any(|e| e.backend_id == 11));
        assert!(snap.elements.iter().all(|e| e.backend_id != 3));
    }

    #[test]
    fn exclude_drops_subtrees() {
        let options = SnapshotOptions {
            exclude: vec!["link".to_string()],
            ..Default::default()
        };
        let snap = build_snapshot("https://a.test/", "", &page_tree(), 1, &options);
        assert!(snap.elements.iter().all(|e| e.role != "link"));
    }

    #[test]
    fn render_wire_format() {
        let snap = build_snapshot(
            "https://a.test/",
            "Example",
            &page_tree(),
            1,
            &SnapshotOptions::default(),
        );
        let wire = snap.render();
        let first = wire.lines().next().unwrap();
        assert!(first.starts_with("[s1e0] document \"Example\""));
        // Children are indented two spaces per depth level.
        assert!(wire.lines().any(|l| l.starts_with("  [")));
    }

    #[test]
    fn diff_detects_added_removed_changed() {
        let old_tree = node(1, "document", "P", vec![
            node(2, "button", "A", vec![]),
            node(3, "button", "B", vec![]),
        ]);
        let new_tree = node(1, "document", "P", vec![
            node(2, "button", "A renamed", vec![]),
            node(4, "button", "C", vec![]),
        ]);
        let old = build_snapshot("https://a.test/", "", &old_tree, 1, &SnapshotOptions::default());
        let new = build_snapshot("https://a.test/", "", &new_tree, 2, &SnapshotOptions::default());

        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.changed.iter().any(|c| c.field == "name"));
        // Added refs belong to the new generation.
        assert_eq!(diff.added[0].generation(), Some(2));
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let old = build_snapshot("https://a.test/", "", &page_tree(), 1, &SnapshotOptions::default());
        let new = build_snapshot("https://a.test/", "", &page_tree(), 2, &SnapshotOptions::default());
        assert!(diff_snapshots(&old, &new).is_empty());
    }
}
