// ── Astro Engine: Menu Tree ────────────────────────────────────────────────
//
// The static, read-only navigation tree. Built once from a TOML definition
// (plus the onboarding prompts, which live outside the browsable tree),
// validated, paired with its ActionRegistry, and published as an
// Arc<MenuSet>. Reload swaps the whole pair; sessions only ever hold node ids.
//
// Module layout:
//   mod.rs       — node types, MenuTree build + validation, MenuSet, MenuCatalog
//   registry.rs  — ActionRegistry (trigger → descriptor)

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{NodeId, Session, SubscriptionTier};
use crate::engine::onboarding::OnboardingStep;
use log::info;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub mod registry;

pub use registry::{ActionDescriptor, ActionRegistry, ActionTarget, ControlInput, Trigger};

/// Built-in menu definition.
pub const DEFAULT_MENU: &str = include_str!("default_menu.toml");

// ── Node types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Menu,
    TextPrompt,
    TerminalAction,
}

/// Preferred reply shape for a menu. Buttons degrade to a list when the
/// options do not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Render {
    Text,
    Buttons,
    #[default]
    List,
    /// Image/video/document with the body and numbered options as caption.
    Media,
}

/// Media kinds a node can be rendered as.
pub const NODE_MEDIA_TYPES: &[&str] = &["image", "video", "document"];

/// Attachment sent when a node renders as media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSpec {
    #[serde(rename = "type")]
    pub media_type: String,
    /// Provider media id or public https link.
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Date,
    Time,
    Place,
    Language,
    Confirmation,
    FreeText,
}

/// What a text-prompt expects next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Stored in `Session::pending_input` while the prompt is active.
    pub tag: String,
    pub kind: FieldKind,
}

/// Collaborator call bound to a terminal action or an accepted prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collaborator", rename_all = "snake_case")]
pub enum ActionRef {
    Calculation { kind: String },
    Generation { kind: String },
    /// Show the stored birth profile.
    Profile,
    /// Switch the session locale to the accepted value.
    SetLanguage,
}

/// Option rows a list menu can show; non-root menus give two rows to Back / Main menu.
pub fn list_room(is_root: bool) -> usize {
    crate::atoms::constants::MAX_LIST_ROWS - if is_root { 0 } else { 2 }
}

fn all_tiers() -> Vec<SubscriptionTier> {
    SubscriptionTier::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Translation key for the option label.
    pub title: String,
    /// Translation key for the body shown when the node is entered.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default = "all_tiers")]
    pub visibility: Vec<SubscriptionTier>,
    #[serde(default)]
    pub action: Option<ActionRef>,
    #[serde(default)]
    pub render: Render,
    /// Free-text triggers, matched case-insensitively.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Reachable from anywhere, not only from its parent.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub field: Option<FieldSpec>,
    #[serde(default)]
    pub media: Option<MediaSpec>,
}

impl MenuNode {
    pub fn visible_to(&self, tier: SubscriptionTier) -> bool {
        self.visibility.contains(&tier)
    }

    /// Title key the renderer should use for the body when no prompt is set.
    pub fn body_key(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.title)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MenuDefinition {
    root: NodeId,
    #[serde(rename = "node", default)]
    nodes: Vec<MenuNode>,
}

// ── Tree ───────────────────────────────────────────────────────────────────

/// Arena of nodes keyed by id, with a parent index.
#[derive(Debug)]
pub struct MenuTree {
    root: NodeId,
    nodes: HashMap<NodeId, MenuNode>,
    /// Definition order, for stable iteration.
    order: Vec<NodeId>,
    parents: HashMap<NodeId, NodeId>,
}

impl MenuTree {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let def: MenuDefinition = toml::from_str(text)?;
        Self::build(def.root, def.nodes)
    }

    fn build(root: NodeId, defined: Vec<MenuNode>) -> EngineResult<Self> {
        let mut nodes = HashMap::new();
        let mut order = Vec::new();

        for node in defined {
            if node.id.starts_with("onboarding.") || node.id.starts_with("nav.") {
                return Err(EngineError::Config(format!("node id '{}' uses a reserved prefix", node.id)));
            }
            Self::check_node(&node)?;
            order.push(node.id.clone());
            if nodes.insert(node.id.clone(), node).is_some() {
                return Err(EngineError::Config(format!("duplicate node id '{}'", order[order.len() - 1])));
            }
        }

        match nodes.get(&root) {
            None => return Err(EngineError::Config(format!("root node '{}' is not defined", root))),
            Some(n) if n.kind != NodeKind::Menu => {
                return Err(EngineError::Config(format!("root node '{}' must be a menu", root)))
            }
            Some(n) if n.global => {
                return Err(EngineError::Config(format!("root node '{}' cannot be global", root)))
            }
            Some(_) => {}
        }

        let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
        for id in &order {
            for child in &nodes[id].children {
                if !nodes.contains_key(child) {
                    return Err(EngineError::Config(format!("'{}' lists unknown child '{}'", id, child)));
                }
                if child == &root {
                    return Err(EngineError::Config(format!("'{}' lists the root as a child", id)));
                }
                if let Some(prev) = parents.insert(child.clone(), id.clone()) {
                    return Err(EngineError::Config(format!(
                        "'{}' has two parents: '{}' and '{}'",
                        child, prev, id
                    )));
                }
            }
        }

        for id in &order {
            if id != &root && !parents.contains_key(id) && !nodes[id].global {
                return Err(EngineError::Config(format!("'{}' is unreachable: no parent and not global", id)));
            }
        }

        // Onboarding prompts: addressable by id, never by trigger.
        for step in OnboardingStep::ALL {
            let node = step.node();
            order.push(node.id.clone());
            nodes.insert(node.id.clone(), node);
        }

        let tree = MenuTree { root, nodes, order, parents };
        tree.check_cycles()?;
        Ok(tree)
    }

    fn check_node(node: &MenuNode) -> EngineResult<()> {
        let fail = |why: &str| Err(EngineError::Config(format!("node '{}': {}", node.id, why)));
        if node.visibility.is_empty() {
            return fail("visibility is empty");
        }
        match node.kind {
            NodeKind::Menu => {
                if node.children.is_empty() {
                    return fail("menu has no children");
                }
                if node.action.is_some() || node.field.is_some() {
                    return fail("menus cannot carry an action or a field");
                }
            }
            NodeKind::TextPrompt => {
                if node.field.is_none() {
                    return fail("text prompt needs a field");
                }
                if node.action.is_none() {
                    return fail("text prompt needs an action for the accepted value");
                }
                if !node.children.is_empty() {
                    return fail("text prompts cannot have children");
                }
            }
            NodeKind::TerminalAction => {
                if node.action.is_none() {
                    return fail("terminal action needs an action");
                }
                if !node.children.is_empty() || node.field.is_some() {
                    return fail("terminal actions cannot have children or a field");
                }
            }
        }
        if node.action == Some(ActionRef::SetLanguage)
            && node.field.as_ref().map(|f| f.kind) != Some(FieldKind::Language)
        {
            return fail("set_language needs a language field");
        }
        Self::check_media(node)
    }

    fn check_media(node: &MenuNode) -> EngineResult<()> {
        let fail = |why: &str| Err(EngineError::Config(format!("node '{}': {}", node.id, why)));
        match (&node.media, node.render) {
            (None, Render::Media) => fail("render = media needs a media attachment"),
            (Some(_), r) if r != Render::Media => fail("media attachment needs render = media"),
            (Some(m), _) => {
                if !NODE_MEDIA_TYPES.contains(&m.media_type.as_str()) {
                    return fail(format!("unsupported media type '{}'", m.media_type).as_str());
                }
                if m.reference.trim().is_empty() {
                    return fail("media reference is empty");
                }
                if node.kind == NodeKind::TerminalAction {
                    return fail("terminal actions cannot render as media");
                }
                if matches!(node.field.as_ref().map(|f| f.kind), Some(FieldKind::Language | FieldKind::Confirmation)) {
                    return fail("language and confirmation prompts render as buttons");
                }
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    /// With single parents a cycle can only hide from the root; walk up from
    /// every node and make sure each chain ends.
    fn check_cycles(&self) -> EngineResult<()> {
        for id in &self.order {
            let mut cur = id;
            let mut steps = 0usize;
            while let Some(p) = self.parents.get(cur) {
                cur = p;
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(EngineError::Config(format!("cycle through '{}'", id)));
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn node(&self, id: &str) -> Option<&MenuNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in definition order (onboarding prompts last).
    pub fn nodes(&self) -> impl Iterator<Item = &MenuNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    pub fn is_child(&self, parent: &str, child: &str) -> bool {
        self.parent_of(child) == Some(parent)
    }

    /// Children of `id` the tier may select, in definition order.
    pub fn visible_children(&self, id: &str, tier: SubscriptionTier) -> Vec<&MenuNode> {
        match self.nodes.get(id) {
            Some(node) => node
                .children
                .iter()
                .filter_map(|c| self.nodes.get(c))
                .filter(|c| c.visible_to(tier))
                .collect(),
            None => vec![],
        }
    }

    pub fn is_onboarding(&self, id: &str) -> bool {
        OnboardingStep::from_node(id).is_some()
    }

    /// Levels below the root (root = 1).
    pub fn depth(&self) -> usize {
        self.order
            .iter()
            .map(|id| {
                let mut d = 1;
                let mut cur = id.as_str();
                while let Some(p) = self.parent_of(cur) {
                    d += 1;
                    cur = p;
                }
                d
            })
            .max()
            .unwrap_or(1)
    }

    /// Cross-field session invariants against this tree.
    pub fn check_session(&self, session: &Session) -> EngineResult<()> {
        let node = self
            .node(&session.current_node)
            .ok_or_else(|| EngineError::Store(format!("current node '{}' not in tree", session.current_node)))?;
        let expected = node.field.as_ref().map(|f| f.tag.as_str());
        if session.pending_input.as_deref() != expected {
            return Err(EngineError::Store(format!(
                "pending_input {:?} does not match node '{}' (expects {:?})",
                session.pending_input, node.id, expected
            )));
        }
        if session.navigation_stack.last() == Some(&session.current_node) {
            return Err(EngineError::Store(format!("stack top repeats current node '{}'", node.id)));
        }
        if !session.profile_complete && !self.is_onboarding(&node.id) {
            return Err(EngineError::Store(format!("incomplete profile outside onboarding at '{}'", node.id)));
        }
        Ok(())
    }
}

// ── MenuSet / MenuCatalog ──────────────────────────────────────────────────

/// A validated tree and the registry built from it. Always swapped together.
#[derive(Debug)]
pub struct MenuSet {
    pub tree: MenuTree,
    pub registry: ActionRegistry,
}

impl MenuSet {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let tree = MenuTree::from_toml_str(text)?;
        let registry = ActionRegistry::build(&tree)?;
        for node in tree.nodes() {
            if node.kind != NodeKind::Menu || !matches!(node.render, Render::Buttons | Render::List) {
                continue;
            }
            let room = list_room(node.id == tree.root());
            if node.children.len() > room {
                return Err(EngineError::Config(format!(
                    "menu '{}' has {} options but a list shows only {} next to navigation",
                    node.id,
                    node.children.len(),
                    room
                )));
            }
        }
        Ok(MenuSet { tree, registry })
    }

    pub fn builtin() -> EngineResult<Self> {
        Self::from_toml_str(DEFAULT_MENU)
    }

    /// Load from `path`, or the built-in definition.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                let set = Self::from_toml_str(&text)?;
                info!("[menu] Loaded {} nodes from {:?}", set.tree.nodes().count(), p);
                Ok(set)
            }
            None => Self::builtin(),
        }
    }
}

/// Current menu set. Readers take a snapshot for the whole event.
pub struct MenuCatalog {
    current: RwLock<Arc<MenuSet>>,
}

impl MenuCatalog {
    pub fn new(set: MenuSet) -> Self {
        Self { current: RwLock::new(Arc::new(set)) }
    }

    pub fn snapshot(&self) -> Arc<MenuSet> {
        self.current.read().clone()
    }

    /// Replace tree and registry in one step. In-flight events keep the
    /// snapshot they started with.
    pub fn swap(&self, set: MenuSet) {
        let nodes = set.tree.nodes().count();
        *self.current.write() = Arc::new(set);
        info!("[menu] Swapped menu set ({} nodes)", nodes);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SMALL: &str = r#"
        root = "main"

        [[node]]
        id = "main"
        kind = "menu"
        title = "t.main"
        children = ["a", "b"]

        [[node]]
        id = "a"
        kind = "terminal_action"
        title = "t.a"
        action = { collaborator = "calculation", kind = "x" }

        [[node]]
        id = "b"
        kind = "text_prompt"
        title = "t.b"
        field = { tag = "awaiting-b", kind = "free_text" }
        action = { collaborator = "generation", kind = "q" }
        visibility = ["premium"]
    "#;

    #[test]
    fn builtin_menu_builds() {
        let set = MenuSet::builtin().unwrap();
        assert_eq!(set.tree.root(), "main");
        assert!(set.tree.depth() >= 4);
        assert!(set.tree.contains(crate::atoms::constants::ONBOARDING_FIRST_NODE));
    }

    #[test]
    fn parents_and_visibility() {
        let tree = MenuTree::from_toml_str(SMALL).unwrap();
        assert!(tree.is_child("main", "a"));
        assert_eq!(tree.parent_of("main"), None);
        let free: Vec<_> = tree.visible_children("main", SubscriptionTier::Free).iter().map(|n| n.id.clone()).collect();
        assert_eq!(free, vec!["a"]);
        assert_eq!(tree.visible_children("main", SubscriptionTier::Premium).len(), 2);
    }

    #[test]
    fn rejects_dangling_child() {
        let bad = SMALL.replace(r#"children = ["a", "b"]"#, r#"children = ["a", "b", "ghost"]"#);
        assert!(matches!(MenuTree::from_toml_str(&bad), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_orphan_and_bad_root() {
        let orphan = SMALL.replace(r#"children = ["a", "b"]"#, r#"children = ["a"]"#);
        assert!(MenuTree::from_toml_str(&orphan).is_err());
        let bad_root = SMALL.replace(r#"root = "main""#, r#"root = "a""#);
        assert!(MenuTree::from_toml_str(&bad_root).is_err());
    }

    #[test]
    fn rejects_prompt_without_field() {
        let bad = SMALL.replace(r#"field = { tag = "awaiting-b", kind = "free_text" }"#, "");
        assert!(MenuTree::from_toml_str(&bad).is_err());
    }

    #[test]
    fn session_invariants() {
        let tree = MenuTree::from_toml_str(SMALL).unwrap();
        let mut s = Session::new_default("u", "en", Utc::now());
        assert!(tree.check_session(&s).is_ok());

        s.profile_complete = true;
        s.current_node = "b".into();
        assert!(tree.check_session(&s).is_err()); // pending tag mismatch
        s.pending_input = Some("awaiting-b".into());
        assert!(tree.check_session(&s).is_ok());

        s.current_node = "main".into();
        assert!(tree.check_session(&s).is_err()); // pending on a menu
        s.pending_input = None;
        s.navigation_stack = vec!["main".into()];
        assert!(tree.check_session(&s).is_err()); // stack top == current
    }

    #[test]
    fn catalog_swaps_whole_set() {
        let catalog = MenuCatalog::new(MenuSet::builtin().unwrap());
        let before = catalog.snapshot();
        catalog.swap(MenuSet::from_toml_str(SMALL).unwrap());
        assert!(before.tree.contains("charts"));
        assert!(!catalog.snapshot().tree.contains("charts"));
        assert!(catalog.snapshot().registry.resolve(&Trigger::Id("b")).is_some());
    }

    #[test]
    fn media_render_needs_a_valid_attachment() {
        let with = |extra: &str| SMALL.replace(r#"children = ["a", "b"]"#, &format!("children = [\"a\", \"b\"]\n{}", extra));

        let ok = with(r#"render = "media"
        media = { type = "image", reference = "https://cdn.example/main.jpg" }"#);
        let tree = MenuTree::from_toml_str(&ok).unwrap();
        let main = tree.node("main").unwrap();
        assert_eq!(main.render, Render::Media);
        assert_eq!(main.media.as_ref().unwrap().media_type, "image");

        for bad in [
            r#"render = "media""#,
            r#"media = { type = "image", reference = "M1" }"#,
            r#"render = "media"
        media = { type = "audio", reference = "M1" }"#,
            r#"render = "media"
        media = { type = "document", reference = "  " }"#,
        ] {
            assert!(matches!(MenuTree::from_toml_str(&with(bad)), Err(EngineError::Config(_))), "{}", bad);
        }
    }

    fn wide(root_children: usize, sub_children: usize) -> String {
        let mut text = String::from("root = \"main\"\n");
        let mut top: Vec<String> = vec!["\"sub\"".into()];
        top.extend((1..root_children).map(|i| format!("\"r{}\"", i)));
        text.push_str(&format!(
            "[[node]]\nid = \"main\"\nkind = \"menu\"\ntitle = \"t\"\nchildren = [{}]\n",
            top.join(", ")
        ));
        let subs: Vec<String> = (0..sub_children).map(|i| format!("\"s{}\"", i)).collect();
        text.push_str(&format!(
            "[[node]]\nid = \"sub\"\nkind = \"menu\"\ntitle = \"t\"\nchildren = [{}]\n",
            subs.join(", ")
        ));
        let leaves = (1..root_children).map(|i| format!("r{}", i)).chain((0..sub_children).map(|i| format!("s{}", i)));
        for id in leaves {
            text.push_str(&format!(
                "[[node]]\nid = \"{}\"\nkind = \"terminal_action\"\ntitle = \"t\"\naction = {{ collaborator = \"calculation\", kind = \"{}\" }}\n",
                id, id
            ));
        }
        text
    }

    #[test]
    fn list_menus_must_fit_their_rows() {
        assert!(MenuSet::from_toml_str(&wide(10, 8)).is_ok());
        assert!(matches!(MenuSet::from_toml_str(&wide(11, 8)), Err(EngineError::Config(_))));
        assert!(matches!(MenuSet::from_toml_str(&wide(10, 9)), Err(EngineError::Config(_))));
        // Numbered text menus have no row limit.
        let text = wide(4, 12).replacen("id = \"sub\"\nkind = \"menu\"", "id = \"sub\"\nkind = \"menu\"\nrender = \"text\"", 1);
        assert!(MenuSet::from_toml_str(&text).is_ok());
    }
}
