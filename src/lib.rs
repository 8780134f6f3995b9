//! kv-git is a content-addressed, branchable commit log over a pluggable
//! byte-oriented key-value backend: every write lands as an immutable
//! commit, branch heads advance via compare-and-swap, and concurrent
//! writers auto-merge disjoint changes through a three-way merge.

pub mod backend;
pub mod codec;
pub mod commit_builder;
pub mod config;
pub mod errors;
pub mod gc;
pub mod graph;
pub mod hash;
pub mod merge;
pub mod namespaced;
pub mod records;
pub mod staged;
pub mod store;
pub mod typed;
pub mod view;

pub use codec::{InfoMap, Keyset, MetaEntry, MetaMap};
pub use errors::{KvGitError, KvGitResult};
pub use gc::{GcView, RebaseResult};
pub use graph::{DiffResult, HistoryMode};
pub use hash::CommitId;
pub use merge::{MergeFn, MergeResult, MergeStrategy, OnConflict};
pub use namespaced::Namespaced;
pub use staged::Staged;
pub use store::{open_store, StoreKind};
pub use view::View;
