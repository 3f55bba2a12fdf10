pub mod emptier;
pub mod guard_store;
pub mod reconciler;
pub mod storage_service;
pub mod watcher;

#[cfg(test)]
pub mod testing;
