//! Evaluated properties and items
//!
//! Tracks which properties/items of one instance have been evaluated by the
//! keywords applied to it so far. Every change is logged so a failed branch
//! can be rolled back to a snapshot.

use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Undo {
    Prop(String),
    Item(usize),
    AllProps,
    ItemsFrom(Option<usize>),
}

#[derive(Debug, Clone, Default)]
pub struct EvaluatedKeys {
    track_props: bool,
    track_items: bool,
    props: HashSet<String>,
    items: HashSet<usize>,
    all_props: bool,
    /// Every index at or above this one counts as evaluated
    items_from: Option<usize>,
    log: Vec<Undo>,
}

/// Position in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot(usize);

impl EvaluatedKeys {
    pub fn new(track_props: bool, track_items: bool) -> Self {
        Self {
            track_props,
            track_items,
            ..Default::default()
        }
    }

    /// An empty set with the same tracking switches, for a child instance
    pub fn fresh(&self) -> Self {
        Self::new(self.track_props, self.track_items)
    }

    pub fn is_enabled(&self) -> bool {
        self.track_props || self.track_items
    }

    pub fn mark_prop(&mut self, name: &str) {
        if self.track_props && !self.all_props && self.props.insert(name.to_string()) {
            self.log.push(Undo::Prop(name.to_string()));
        }
    }

    pub fn mark_all_props(&mut self) {
        if self.track_props && !self.all_props {
            self.all_props = true;
            self.log.push(Undo::AllProps);
        }
    }

    pub fn mark_item(&mut self, index: usize) {
        if self.track_items && !self.item_evaluated(index) && self.items.insert(index) {
            self.log.push(Undo::Item(index));
        }
    }

    pub fn mark_items_from(&mut self, start: usize) {
        if !self.track_items {
            return;
        }
        if self.items_from.map_or(true, |current| start < current) {
            self.log.push(Undo::ItemsFrom(self.items_from));
            self.items_from = Some(start);
        }
    }

    pub fn prop_evaluated(&self, name: &str) -> bool {
        self.all_props || self.props.contains(name)
    }

    pub fn item_evaluated(&self, index: usize) -> bool {
        self.items_from.is_some_and(|start| index >= start) || self.items.contains(&index)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.log.len())
    }

    /// Undo every change made after the snapshot
    pub fn rollback(&mut self, snapshot: Snapshot) {
        while self.log.len() > snapshot.0 {
            match self.log.pop() {
                Some(Undo::Prop(name)) => {
                    self.props.remove(&name);
                }
                Some(Undo::Item(index)) => {
                    self.items.remove(&index);
                }
                Some(Undo::AllProps) => self.all_props = false,
                Some(Undo::ItemsFrom(previous)) => self.items_from = previous,
                None => break,
            }
        }
    }

    /// Fold a nested set for the same instance into this one
    pub fn merge(&mut self, other: EvaluatedKeys) {
        if other.all_props {
            self.mark_all_props();
        }
        for name in &other.props {
            self.mark_prop(name);
        }
        if let Some(start) = other.items_from {
            self.mark_items_from(start);
        }
        for index in other.items {
            self.mark_item(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_restores_state() {
        let mut keys = EvaluatedKeys::new(true, true);
        keys.mark_prop("a");
        let snap = keys.snapshot();
        keys.mark_prop("b");
        keys.mark_all_props();
        keys.mark_items_from(2);
        keys.mark_item(0);
        assert!(keys.prop_evaluated("zzz"));
        assert!(keys.item_evaluated(5));
        keys.rollback(snap);
        assert!(keys.prop_evaluated("a"));
        assert!(!keys.prop_evaluated("b"));
        assert!(!keys.item_evaluated(5));
        assert!(!keys.item_evaluated(0));
    }

    #[test]
    fn test_disabled_tracking_is_inert() {
        let mut keys = EvaluatedKeys::new(false, false);
        keys.mark_prop("a");
        keys.mark_items_from(0);
        assert!(!keys.is_enabled());
        assert!(!keys.prop_evaluated("a"));
        assert!(!keys.item_evaluated(0));
    }

    #[test]
    fn test_merge() {
        let mut outer = EvaluatedKeys::new(true, true);
        let mut inner = outer.fresh();
        inner.mark_prop("x");
        inner.mark_items_from(1);
        outer.merge(inner);
        assert!(outer.prop_evaluated("x"));
        assert!(outer.item_evaluated(3));
        assert!(!outer.item_evaluated(0));
    }
}
