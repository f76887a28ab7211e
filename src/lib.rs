//! Strata: Composable State Slices
//!
//! Immutable state trees composed from named slices, with structural
//! diffing, structurally shared patch merges and debounced persistence over
//! two independent channels (primary and sensitive).

pub mod config;
pub mod error;
pub mod logging;
pub mod patch;
pub mod slice;
pub mod store;
pub mod tree;

pub use error::{ConfigError, PersistError, SliceError, StoreError};
pub use patch::{clean, diff, merge, Diff, Patch, PatchValue};
pub use slice::{combine_slices, Action, MountOptions, Slice, SliceBuilder};
pub use store::{PersistOptions, Persistor, Store};
pub use tree::{KeyPath, Tree, Value};
