//! Page elements: the mutable cell holding the current page of a slot

use super::page::Page;
use crate::config::PageSync;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Cell publishing the current [`Page`] of one slot
pub trait PageElement: Send + Sync + std::fmt::Debug {
    /// Current page, `None` when the slot is unallocated
    fn get(&self) -> Option<Arc<Page>>;

    /// Replace `current` with `new`
    ///
    /// Returns `false` when the cell no longer holds `current`.
    fn compare_and_set(&self, current: &Option<Arc<Page>>, new: Option<Arc<Page>>) -> bool;

    /// Whether a read taken from `page` is still valid
    fn still_current(&self, page: &Arc<Page>) -> bool;
}

/// Build the element for a synchronization policy
pub fn new_element(sync: PageSync) -> Box<dyn PageElement> {
    match sync {
        PageSync::Atomic => Box::new(AtomicPageElement::default()),
        PageSync::NoSync => Box::new(UnsyncPageElement::default()),
    }
}

fn same(a: &Option<Arc<Page>>, b: &Option<Arc<Page>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Compare-and-swap element for many concurrent writers
#[derive(Debug, Default)]
pub struct AtomicPageElement {
    cell: ArcSwapOption<Page>,
}

impl PageElement for AtomicPageElement {
    fn get(&self) -> Option<Arc<Page>> {
        self.cell.load_full()
    }

    fn compare_and_set(&self, current: &Option<Arc<Page>>, new: Option<Arc<Page>>) -> bool {
        let previous = self.cell.compare_and_swap(current, new);
        same(&previous, current)
    }

    fn still_current(&self, page: &Arc<Page>) -> bool {
        let current = self.cell.load();
        matches!(&*current, Some(c) if Arc::ptr_eq(c, page))
    }
}

/// Element for a single writer: plain stores, readers never retry
///
/// A store here overwrites whatever the cell holds, including an eviction
/// that ran between the writer's `get` and its store. Callers publish under
/// the slot's I/O read lock so eviction cannot interleave.
#[derive(Debug, Default)]
pub struct UnsyncPageElement {
    cell: ArcSwapOption<Page>,
}

impl PageElement for UnsyncPageElement {
    fn get(&self) -> Option<Arc<Page>> {
        self.cell.load_full()
    }

    fn compare_and_set(&self, _current: &Option<Arc<Page>>, new: Option<Arc<Page>>) -> bool {
        self.cell.store(new);
        true
    }

    fn still_current(&self, _page: &Arc<Page>) -> bool {
        true
    }
}
