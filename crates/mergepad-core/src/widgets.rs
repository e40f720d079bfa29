//! Per-hunk UI anchors that survive hunk recomputation.
//!
//! Hunks have no identity across diff passes, so anchors live in an arena of
//! slots indexed by hunk position. Each pass walks the new hunk list and, per
//! slot, keeps the widget, moves it, or replaces it; slots past the new hunk
//! count are disposed. Reusing slots in place avoids tearing down and
//! recreating every overlay on each keystroke.

use crate::types::{Hunk, HunkAnchor};

/// Host-side rendering of hunk anchors (overlay widgets, decorations, ...).
pub trait AnchorRenderer {
    /// Whatever the host needs to keep alive for one anchor.
    type Widget;

    /// Create a widget at `anchor`.
    fn create(&mut self, anchor: HunkAnchor) -> Self::Widget;

    /// Move an existing widget to a new line on the same side.
    fn retarget(&mut self, widget: &mut Self::Widget, anchor: HunkAnchor);

    /// Release the widget's resources. Called exactly once per widget.
    fn dispose(&mut self, widget: Self::Widget);
}

/// What happened to one slot during [`HunkWidgets::reconcile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotTransition {
    /// Same side, same line: nothing to do.
    Keep { index: usize },
    /// Same side, new line: updated in place.
    Retarget {
        index: usize,
        from_line: usize,
        to_line: usize,
    },
    /// Side changed or the slot was new: old widget (if any) disposed, new one created.
    Recreate { anchor: HunkAnchor, replaced: bool },
    /// Past the new hunk count: disposed.
    Dispose { index: usize },
}

struct AnchorSlot<W> {
    anchor: HunkAnchor,
    widget: Option<W>,
}

/// Arena of anchor slots, one per current hunk.
pub struct HunkWidgets<R: AnchorRenderer> {
    renderer: R,
    slots: Vec<AnchorSlot<R::Widget>>,
}

impl<R: AnchorRenderer> HunkWidgets<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            slots: Vec::new(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current anchors, in hunk order.
    pub fn anchors(&self) -> Vec<HunkAnchor> {
        self.slots.iter().map(|slot| slot.anchor).collect()
    }

    /// Bring the slots in line with a freshly computed hunk list.
    pub fn reconcile(&mut self, hunks: &[Hunk]) -> Vec<SlotTransition> {
        let mut transitions = Vec::with_capacity(hunks.len().max(self.slots.len()));

        while self.slots.len() > hunks.len() {
            let index = self.slots.len() - 1;
            if let Some(slot) = self.slots.pop() {
                if let Some(widget) = slot.widget {
                    self.renderer.dispose(widget);
                }
            }
            transitions.push(SlotTransition::Dispose { index });
        }

        for (index, hunk) in hunks.iter().enumerate() {
            let anchor = HunkAnchor::for_hunk(index, hunk);

            if index >= self.slots.len() {
                let widget = self.renderer.create(anchor);
                self.slots.push(AnchorSlot {
                    anchor,
                    widget: Some(widget),
                });
                transitions.push(SlotTransition::Recreate {
                    anchor,
                    replaced: false,
                });
                continue;
            }

            let slot = &mut self.slots[index];
            if slot.widget.is_some() && slot.anchor.side == anchor.side {
                if slot.anchor.line_number == anchor.line_number {
                    transitions.push(SlotTransition::Keep { index });
                    continue;
                }
                if let Some(widget) = slot.widget.as_mut() {
                    self.renderer.retarget(widget, anchor);
                }
                transitions.push(SlotTransition::Retarget {
                    index,
                    from_line: slot.anchor.line_number,
                    to_line: anchor.line_number,
                });
                slot.anchor = anchor;
            } else {
                let replaced = match slot.widget.take() {
                    Some(old) => {
                        self.renderer.dispose(old);
                        true
                    }
                    None => false,
                };
                slot.widget = Some(self.renderer.create(anchor));
                slot.anchor = anchor;
                transitions.push(SlotTransition::Recreate { anchor, replaced });
            }
        }

        tracing::trace!(slots = self.slots.len(), "reconciled hunk anchors");
        transitions
    }

    /// Dispose every widget. Safe to call more than once.
    pub fn dispose_all(&mut self) {
        for slot in self.slots.drain(..) {
            if let Some(widget) = slot.widget {
                self.renderer.dispose(widget);
            }
        }
    }
}

impl<R: AnchorRenderer> Drop for HunkWidgets<R> {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
