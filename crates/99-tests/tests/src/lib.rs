//! End-to-end suite: a producer frame loop feeding consumer threads.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod fixtures;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod native_e2e;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod snapshot_handoff;
