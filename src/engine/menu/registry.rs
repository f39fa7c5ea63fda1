// ── Astro Engine: Action Registry ──────────────────────────────────────────
// Static trigger → descriptor map, built once per MenuSet.
//   • structural ids (button / list row ids) match exactly
//   • keywords match after trim + lowercase
//   • the reserved back / main-menu controls are always present
// A duplicate trigger is a configuration error at build time.

use super::{MenuTree, NodeKind};
use crate::atoms::constants::{BACK_KEYWORDS, MAIN_MENU_KEYWORDS, NAV_BACK_ID, NAV_MAIN_ID};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{NodeId, SubscriptionTier};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInput {
    Back,
    MainMenu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    Node(NodeId),
    Control(ControlInput),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub target: ActionTarget,
    /// Exempt from the parent/child adjacency check.
    pub global: bool,
    /// Tiers allowed to use the trigger.
    pub tiers: Vec<SubscriptionTier>,
}

impl ActionDescriptor {
    pub fn control(input: ControlInput) -> Self {
        Self {
            target: ActionTarget::Control(input),
            global: true,
            tiers: SubscriptionTier::ALL.to_vec(),
        }
    }

    pub fn allows(&self, tier: SubscriptionTier) -> bool {
        self.tiers.contains(&tier)
    }
}

/// What an inbound event offers for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger<'a> {
    /// Button or list-row id.
    Id(&'a str),
    /// Free text.
    Keyword(&'a str),
}

#[derive(Debug, Default)]
pub struct ActionRegistry {
    by_id: HashMap<String, ActionDescriptor>,
    by_keyword: HashMap<String, ActionDescriptor>,
}

pub fn normalize_keyword(raw: &str) -> String {
    raw.trim().to_lowercase()
}

impl ActionRegistry {
    /// Controls, then every structural id and keyword of the browsable tree.
    pub fn build(tree: &MenuTree) -> EngineResult<Self> {
        let mut reg = ActionRegistry::default();

        reg.register(Trigger::Id(NAV_BACK_ID), ActionDescriptor::control(ControlInput::Back))?;
        reg.register(Trigger::Id(NAV_MAIN_ID), ActionDescriptor::control(ControlInput::MainMenu))?;
        for kw in BACK_KEYWORDS {
            reg.register(Trigger::Keyword(kw), ActionDescriptor::control(ControlInput::Back))?;
        }
        for kw in MAIN_MENU_KEYWORDS {
            reg.register(Trigger::Keyword(kw), ActionDescriptor::control(ControlInput::MainMenu))?;
        }

        for node in tree.nodes() {
            if tree.is_onboarding(&node.id) {
                continue;
            }
            let desc = ActionDescriptor {
                target: ActionTarget::Node(node.id.clone()),
                global: node.global,
                tiers: node.visibility.clone(),
            };
            // The root is reached through the main-menu control only.
            if node.id == tree.root() && node.kind == NodeKind::Menu {
                continue;
            }
            reg.register(Trigger::Id(&node.id), desc.clone())?;
            for kw in &node.keywords {
                reg.register(Trigger::Keyword(kw), desc.clone())?;
            }
        }
        Ok(reg)
    }

    pub fn register(&mut self, trigger: Trigger<'_>, descriptor: ActionDescriptor) -> EngineResult<()> {
        let (map, key, kind) = match trigger {
            Trigger::Id(id) => (&mut self.by_id, id.to_string(), "id"),
            Trigger::Keyword(kw) => (&mut self.by_keyword, normalize_keyword(kw), "keyword"),
        };
        if key.is_empty() {
            return Err(EngineError::Config(format!("empty {} trigger", kind)));
        }
        if let Some(existing) = map.get(&key) {
            return Err(EngineError::Config(format!(
                "duplicate {} trigger '{}' ({:?} vs {:?})",
                kind, key, existing.target, descriptor.target
            )));
        }
        map.insert(key, descriptor);
        Ok(())
    }

    pub fn resolve(&self, trigger: &Trigger<'_>) -> Option<&ActionDescriptor> {
        match trigger {
            Trigger::Id(id) => self.by_id.get(*id),
            Trigger::Keyword(kw) => self.by_keyword.get(&normalize_keyword(kw)),
        }
    }

    /// Back / main-menu control named by `trigger`, if any.
    pub fn control(&self, trigger: &Trigger<'_>) -> Option<ControlInput> {
        match self.resolve(trigger)?.target {
            ActionTarget::Control(c) => Some(c),
            ActionTarget::Node(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
