//! Represents what the storage provider reports about a bucket's contents.

/// One page of a bucket listing.
///
/// Only keys are kept: emptying a bucket needs nothing else.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Object keys in this page, possibly empty.
    pub keys: Vec<String>,

    /// Token for the next page. `None` when the listing is complete.
    pub next_continuation_token: Option<String>,
}

/// Summary of one emptying run, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmptyReport {
    /// Listing pages fetched.
    pub pages: usize,

    /// Batched delete calls issued.
    pub batches: usize,

    /// Object keys named in delete calls.
    pub deleted: usize,
}
