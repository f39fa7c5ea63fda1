// ── Astro Engine: Menu State Machine ───────────────────────────────────────
//
// Applies one trigger to a session's position. Pure: no I/O, no rendering.
//
//   back        → pop the stack (root when empty)
//   main menu   → clear the stack, go to root
//   node        → must resolve, be visible to the tier, and be a child of the
//                 current node unless global; otherwise nothing changes
//   menu/prompt → push current (bounded, oldest dropped), move
//   terminal    → caller invokes the action; position unchanged
//
// Revisits push duplicates; only the depth bound limits the stack.

use crate::atoms::types::{NodeId, Session};
use crate::engine::menu::{ActionRegistry, ActionTarget, ControlInput, MenuSet, MenuTree, NodeKind, Trigger};
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Position is now a menu or prompt; show it.
    Moved,
    /// Terminal action selected from the current position.
    Invoke(NodeId),
    /// Unresolved, not visible to the tier, or not reachable from here.
    Rejected,
}

pub struct Navigator<'a> {
    tree: &'a MenuTree,
    registry: &'a ActionRegistry,
    depth: usize,
}

impl<'a> Navigator<'a> {
    pub fn new(menus: &'a MenuSet, depth: usize) -> Self {
        Self { tree: &menus.tree, registry: &menus.registry, depth: depth.max(1) }
    }

    // ── Controls ───────────────────────────────────────────────────────

    pub fn control(&self, session: &mut Session, input: ControlInput) -> Transition {
        match input {
            ControlInput::Back => self.back(session),
            ControlInput::MainMenu => self.main_menu(session),
        }
        Transition::Moved
    }

    pub fn back(&self, session: &mut Session) {
        let target = loop {
            match session.navigation_stack.pop() {
                // Entries from an older menu definition are skipped.
                Some(id) if self.tree.contains(&id) && !self.tree.is_onboarding(&id) => break id,
                Some(id) => debug!("[nav] Dropping stale stack entry '{}'", id),
                None => break self.tree.root().to_string(),
            }
        };
        if target == self.tree.root() {
            session.navigation_stack.clear();
        }
        self.set_position(session, &target);
    }

    pub fn main_menu(&self, session: &mut Session) {
        session.navigation_stack.clear();
        let root = self.tree.root().to_string();
        self.set_position(session, &root);
    }

    // ── Selection ──────────────────────────────────────────────────────

    pub fn select(&self, session: &mut Session, trigger: Trigger<'_>) -> Transition {
        match self.registry.resolve(&trigger) {
            Some(desc) => match &desc.target {
                ActionTarget::Control(c) => self.control(session, *c),
                ActionTarget::Node(id) => {
                    if !desc.allows(session.subscription_tier) {
                        return Transition::Rejected;
                    }
                    self.select_node(session, &id.clone(), desc.global)
                }
            },
            None => self.numbered(session, trigger),
        }
    }

    /// "2" picks the second visible option of the current menu.
    fn numbered(&self, session: &mut Session, trigger: Trigger<'_>) -> Transition {
        let Trigger::Keyword(text) = trigger else {
            return Transition::Rejected;
        };
        let Ok(n) = text.trim().parse::<usize>() else {
            return Transition::Rejected;
        };
        let id = {
            let options = self.tree.visible_children(&session.current_node, session.subscription_tier);
            match n.checked_sub(1).and_then(|i| options.get(i)) {
                Some(node) => node.id.clone(),
                None => return Transition::Rejected,
            }
        };
        self.select_node(session, &id, false)
    }

    pub fn select_node(&self, session: &mut Session, id: &str, global: bool) -> Transition {
        let Some(node) = self.tree.node(id) else {
            return Transition::Rejected;
        };
        if !node.visible_to(session.subscription_tier) {
            return Transition::Rejected;
        }
        if !global && !self.tree.is_child(&session.current_node, id) {
            return Transition::Rejected;
        }
        match node.kind {
            NodeKind::TerminalAction => Transition::Invoke(node.id.clone()),
            NodeKind::Menu | NodeKind::TextPrompt => {
                self.enter(session, id);
                Transition::Moved
            }
        }
    }

    // ── Position ───────────────────────────────────────────────────────

    fn enter(&self, session: &mut Session, id: &str) {
        if session.current_node != id {
            let current = std::mem::take(&mut session.current_node);
            self.push(session, current);
        }
        self.set_position(session, id);
    }

    fn push(&self, session: &mut Session, id: NodeId) {
        if session.navigation_stack.len() >= self.depth {
            let excess = session.navigation_stack.len() + 1 - self.depth;
            session.navigation_stack.drain(..excess);
        }
        session.navigation_stack.push(id);
    }

    /// Move to `id` and set `pending_input` to match the node.
    pub fn set_position(&self, session: &mut Session, id: &str) {
        session.current_node = id.to_string();
        session.pending_input = self.tree.node(id).and_then(|n| n.field.as_ref()).map(|f| f.tag.clone());
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
