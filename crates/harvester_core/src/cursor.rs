//! Incremental cursor walking over a newest-first listing.
//!
//! The checkpoint is the id of the newest item harvested by a previous run.
//! Everything delivered before it in the listing is new; the checkpoint item
//! and everything after it were already harvested.

use serde::{Deserialize, Serialize};

/// Minimal handle needed to refetch an item's full detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub secret: String,
}

impl ItemRef {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

/// One page of a newest-first listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub page: u32,
    /// Only trusted from the first page onwards; the remote reports it per page.
    pub total_pages: u32,
    pub items: Vec<ItemRef>,
}

/// The items newer than the checkpoint, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    items: Vec<ItemRef>,
    stale_checkpoint: bool,
}

impl Delta {
    pub fn items(&self) -> &[ItemRef] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ItemRef> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when a checkpoint was supplied but never seen in the listing.
    /// The whole listing is harvested in that case.
    pub fn stale_checkpoint(&self) -> bool {
        self.stale_checkpoint
    }

    /// Checkpoint to store once every delta item has been processed.
    pub fn next_checkpoint(&self) -> Option<&str> {
        self.items.first().map(|item| item.id.as_str())
    }
}

/// Computes the delta of a complete listing against a checkpoint.
pub fn delta(listing: &[ItemRef], checkpoint: Option<&str>) -> Delta {
    let Some(checkpoint) = checkpoint else {
        return Delta {
            items: listing.to_vec(),
            stale_checkpoint: false,
        };
    };
    match listing.iter().position(|item| item.id == checkpoint) {
        Some(k) => Delta {
            items: listing[..k].to_vec(),
            stale_checkpoint: false,
        },
        None => Delta {
            items: listing.to_vec(),
            stale_checkpoint: !listing.is_empty(),
        },
    }
}

/// Page-at-a-time form of [`delta`].
///
/// Pages must be fed in delivery order. Once the checkpoint has been seen no
/// further page can contribute to the delta, so [`CursorWalker::next_page`]
/// stops asking for more.
#[derive(Debug, Clone)]
pub struct CursorWalker {
    checkpoint: Option<String>,
    total_pages: Option<u32>,
    last_page: u32,
    collected: Vec<ItemRef>,
    seen: usize,
    found: bool,
}

impl CursorWalker {
    pub fn new(checkpoint: Option<String>) -> Self {
        Self {
            checkpoint,
            total_pages: None,
            last_page: 0,
            collected: Vec::new(),
            seen: 0,
            found: false,
        }
    }

    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }

    /// Page number to fetch next, or `None` when the walk is complete.
    pub fn next_page(&self) -> Option<u32> {
        if self.found {
            return None;
        }
        match self.total_pages {
            None => Some(1),
            Some(total) if self.last_page < total => Some(self.last_page + 1),
            Some(_) => None,
        }
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    /// Number of listed items consumed so far, including the checkpoint item.
    pub fn items_seen(&self) -> usize {
        self.seen
    }

    pub fn feed(&mut self, page: ListingPage) {
        if self.found {
            return;
        }
        self.total_pages = Some(page.total_pages);
        // A page number that fails to advance still counts as progress.
        self.last_page = page.page.max(self.last_page + 1);
        for item in page.items {
            self.seen += 1;
            if self.checkpoint.as_deref() == Some(item.id.as_str()) {
                self.found = true;
                return;
            }
            self.collected.push(item);
        }
    }

    pub fn finish(self) -> Delta {
        let stale_checkpoint = self.checkpoint.is_some() && !self.found && self.seen > 0;
        Delta {
            items: self.collected,
            stale_checkpoint,
        }
    }
}
