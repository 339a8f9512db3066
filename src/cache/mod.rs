//! Verbatim cache overlay.
//!
//! Two layers answer queries:
//!
//! - **Bypass entries**: results of registered named queries, kept whole and
//!   served in O(1) when the arguments match
//! - **Normalized store**: everything else, via the [`NormalizedStore`]
//!   capability
//!
//! ## Configuration
//!
//! Bypass behavior is controlled via `verbatim.toml`:
//!
//! ```toml
//! [cache]
//! bypass_queries = ["GetFeed"]
//! overwrite_policy = "always"
//! # ... see config.rs for all options
//! ```

mod config;
mod events;
mod lock;
mod overlay;
mod query;
mod registry;
mod snapshot;
mod store;

pub use config::{OverlayConfig, OverwritePolicy};
pub use events::{ChangeEvent, ChangeListener, ChangeNotifier, Epoch, EventQueue};
pub use overlay::OverlayCache;
pub use query::{
    ArgumentSet, Definition, FragmentDefinition, Name, OperationDefinition, OperationKind,
    QueryDocument, QueryIdentity, identity_of,
};
pub use registry::{BypassEntry, BypassRegistry, Registration, StoreOutcome};
pub use snapshot::{BYPASS_ENTRIES_KEY, CacheSnapshot};
pub use store::{Diff, MemoryStore, MemoryStoreConfig, NormalizedStore, WatchId};
