//! Child reconciliation: deciding which elements survive a rebuild.
//!
//! `update_children` is a multi-pass diff over one child list: sync matching
//! prefixes, scan matching suffixes, resolve the middle through a map of
//! equatable keys with positional reuse for non-keyed children, then unmount
//! whatever was never claimed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::element::{ElementId, ElementTree};
use crate::widgets::{EquatableKey, Widget};

/// Where a child sits in its parent's list. `previous_sibling` lets render
/// hosts splice without scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSlot {
    pub index: usize,
    pub previous_sibling: Option<ElementId>,
}

/// Same configuration value, not just a compatible one.
fn same_widget(a: &Widget, b: &Widget) -> bool {
    match (a, b) {
        (Widget::Stateless(x), Widget::Stateless(y)) => Arc::ptr_eq(x, y),
        (Widget::Stateful(x), Widget::Stateful(y)) => Arc::ptr_eq(x, y),
        (Widget::Render(x), Widget::Render(y)) => Arc::ptr_eq(x, y),
        (Widget::Inherited(x), Widget::Inherited(y)) => Arc::ptr_eq(x, y),
        (Widget::Deferred(x), Widget::Deferred(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

impl ElementTree {
    /// Reconciles one child position. The existing element is kept when the
    /// new widget is the same value (slot refresh only) or a compatible one
    /// (absorbed in place); otherwise it is unmounted and a fresh element is
    /// inflated.
    pub(crate) fn update_child(
        &mut self,
        existing: Option<ElementId>,
        widget: Option<Widget>,
        parent: Option<ElementId>,
        slot: Option<IndexedSlot>,
    ) -> Option<ElementId> {
        let Some(widget) = widget else {
            if let Some(e) = existing {
                self.unmount(e);
            }
            return None;
        };
        if let Some(e) = existing {
            if let Some(old_widget) = self.widget_of(e) {
                if same_widget(&old_widget, &widget) {
                    if self.slot_of(e) != slot {
                        self.update_slot(e, slot);
                    }
                    return Some(e);
                }
                if old_widget.can_update(&widget) {
                    if self.slot_of(e) != slot {
                        self.update_slot(e, slot.clone());
                    }
                    self.update_element(e, widget);
                    return Some(e);
                }
            }
            self.unmount(e);
        }
        Some(self.mount(widget, parent, slot))
    }

    /// Reconciles a whole child list against new widgets, preserving element
    /// identity wherever compatibility allows.
    pub(crate) fn update_children(
        &mut self,
        parent: ElementId,
        old_children: Vec<ElementId>,
        new_widgets: Vec<Widget>,
    ) -> Vec<ElementId> {
        let mut new_children: Vec<ElementId> = Vec::with_capacity(new_widgets.len());
        let mut prev_child: Option<ElementId> = None;

        let mut old_start = 0usize;
        let mut new_start = 0usize;
        let old_end = old_children.len();
        let new_end = new_widgets.len();

        // 1. Sync from the top while positions stay compatible.
        while old_start < old_end && new_start < new_end {
            let old_child = old_children[old_start];
            let compatible = self
                .widget_of(old_child)
                .map(|w| w.can_update(&new_widgets[new_start]))
                .unwrap_or(false);
            if !compatible {
                break;
            }
            let slot = IndexedSlot {
                index: new_start,
                previous_sibling: prev_child,
            };
            if let Some(child) = self.update_child(
                Some(old_child),
                Some(new_widgets[new_start].clone()),
                Some(parent),
                Some(slot),
            ) {
                new_children.push(child);
                prev_child = Some(child);
            }
            old_start += 1;
            new_start += 1;
        }

        // 2. Scan a matching suffix from the bottom; processed after the
        // middle so its slots carry final indices.
        let mut old_end_scan = old_end;
        let mut new_end_scan = new_end;
        while old_end_scan > old_start && new_end_scan > new_start {
            let compatible = self
                .widget_of(old_children[old_end_scan - 1])
                .map(|w| w.can_update(&new_widgets[new_end_scan - 1]))
                .unwrap_or(false);
            if !compatible {
                break;
            }
            old_end_scan -= 1;
            new_end_scan -= 1;
        }

        // 3. Index the unresolved middle: equatable keys into a map, the
        // rest in order for positional reuse. A duplicate key keeps the
        // later child; the shadowed one can never match again.
        let mut keyed_old: HashMap<EquatableKey, ElementId> = HashMap::new();
        let mut non_keyed_old: Vec<Option<ElementId>> = Vec::new();
        for &child in &old_children[old_start..old_end_scan] {
            let key = self.widget_of(child).map(|w| w.key()).unwrap_or_default();
            match key.equatable() {
                Some(k) => {
                    if let Some(shadowed) = keyed_old.insert(k.clone(), child) {
                        log::debug!("duplicate child key {:?}; keeping the later child", k);
                        self.unmount(shadowed);
                    }
                }
                None => non_keyed_old.push(Some(child)),
            }
        }

        // 4. Resolve middle widgets: keyed lookup first, then in-order
        // non-keyed reuse (a candidate that cannot update is skipped for
        // good), else a fresh inflate inside update_child.
        let mut non_keyed_idx = 0usize;
        while new_start < new_end_scan {
            let new_widget = new_widgets[new_start].clone();
            let mut old_child: Option<ElementId> = None;
            if let Some(k) = new_widget.key().equatable() {
                old_child = keyed_old.remove(&k);
            } else if non_keyed_idx < non_keyed_old.len() {
                if let Some(candidate) = non_keyed_old[non_keyed_idx] {
                    let compatible = self
                        .widget_of(candidate)
                        .map(|w| w.can_update(&new_widget))
                        .unwrap_or(false);
                    if compatible {
                        old_child = Some(candidate);
                        non_keyed_old[non_keyed_idx] = None;
                    }
                }
                non_keyed_idx += 1;
            }
            let slot = IndexedSlot {
                index: new_children.len(),
                previous_sibling: prev_child,
            };
            if let Some(child) =
                self.update_child(old_child, Some(new_widget), Some(parent), Some(slot))
            {
                new_children.push(child);
                prev_child = Some(child);
            }
            new_start += 1;
        }

        // 5. Process the saved suffix with its final slots.
        while new_end_scan < new_end {
            let old_child = old_children[old_end_scan];
            let slot = IndexedSlot {
                index: new_children.len(),
                previous_sibling: prev_child,
            };
            if let Some(child) = self.update_child(
                Some(old_child),
                Some(new_widgets[new_end_scan].clone()),
                Some(parent),
                Some(slot),
            ) {
                new_children.push(child);
                prev_child = Some(child);
            }
            old_end_scan += 1;
            new_end_scan += 1;
        }

        // 6. Unmount everything never claimed.
        for (_, el) in keyed_old.drain() {
            self.unmount(el);
        }
        for el in non_keyed_old.into_iter().flatten() {
            self.unmount(el);
        }

        new_children
    }
}
