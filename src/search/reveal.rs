use std::ops::Range;

pub const PAGE_SIZE: usize = 24;

/// How much of a ranked list is shown. Grows by one page each time the
/// end-of-list sentinel goes from hidden to visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealWindow {
    page_size: usize,
    total: usize,
    revealed: usize,
    sentinel_visible: bool,
}

impl RevealWindow {
    pub fn new(total: usize) -> Self {
        Self::with_page_size(total, PAGE_SIZE)
    }

    pub fn with_page_size(total: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            total,
            revealed: page_size,
            sentinel_visible: false,
        }
    }

    /// Back to one page, e.g. after the query changed.
    pub fn reset(&mut self, total: usize) {
        self.total = total;
        self.revealed = self.page_size;
        self.sentinel_visible = false;
    }

    /// New list length without touching the revealed count.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    /// Feeds a visibility report for the sentinel. Returns true if a page was added.
    pub fn observe(&mut self, visible: bool) -> bool {
        let edge = visible && !self.sentinel_visible;
        self.sentinel_visible = visible;
        if edge && self.has_more() {
            self.revealed += self.page_size;
            true
        } else {
            false
        }
    }

    pub fn visible_count(&self) -> usize {
        self.revealed.min(self.total)
    }

    pub fn range(&self) -> Range<usize> {
        0..self.visible_count()
    }

    pub fn has_more(&self) -> bool {
        self.revealed < self.total
    }
}
