//! # crmsets - resource-set constraint reconciliation
//!
//! crmsets keeps an in-memory model of placement and ordering
//! constraints synchronized with the resource-set records of a cluster
//! resource manager. Live `ResourceSetConnection` records arriving from
//! the cluster are matched against [`ConstraintPlaceholder`] nodes (the
//! AND/OR combinators of an interactive constraint graph), new sets are
//! composed with freshly synthesized identifiers, and chains of
//! placeholders commit to the cluster as one batched directive.
//!
//! ## Core concepts
//!
//! - **ResourceSet**: an ordered group of resources with `sequential`
//!   and `require-all` semantics
//! - **ResourceSetConnection**: one colocation or order record linking
//!   two sets
//! - **ConstraintPlaceholder**: an AND/OR combinator owning up to one
//!   connection per kind, plus direction-reversal bookkeeping
//! - **Reconciliation**: a pure diff of live records against a registry
//!   snapshot, applied by a single writer
//! - **Chain commit**: placeholders linked through boundary sets emit a
//!   single [`ApplySetsDirective`] per chain
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::collections::HashSet;
//! use crmsets::{reconcile, PlaceholderRegistry, ResourceId};
//!
//! let registry = PlaceholderRegistry::new();
//! let known: HashSet<ResourceId> =
//!     ["a", "b"].into_iter().map(ResourceId::new).collect();
//!
//! let snapshot = registry.snapshot()?;
//! let outcome = reconcile(&live_records, &snapshot, &known);
//! registry.apply(&outcome)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod connection;
pub mod error;
pub mod placeholder;
pub mod resource;
pub mod rsc_set;
pub mod version;

// Engine
pub mod chain;
pub mod compose;
pub mod directive;
pub mod graph;
pub mod live;
pub mod reconcile;
pub mod registry;

// Re-export primary types at crate root for convenience
pub use chain::{ChainCommitter, GroupId, PlaceholderGroup};
pub use compose::{ComposedSets, Composer};
pub use connection::{ConstraintKind, ResourceSetConnection};
pub use directive::{ApplySetsDirective, DirectiveSet, DirectiveSink, SetAttrs};
pub use error::{ComposeError, CrmError, CrmResult, ReconcileError, ValidationError};
pub use graph::{GraphAdjacency, GraphEvent, GraphEventHub, GraphEventStream, NodeRef};
pub use live::{InMemoryLiveView, LiveView};
pub use placeholder::{ConstraintPlaceholder, Preference};
pub use reconcile::{reconcile, ReconcileOutcome};
pub use registry::{PlaceholderHandle, PlaceholderRegistry, RegistrySnapshot};
pub use resource::ResourceId;
pub use rsc_set::ResourceSet;
pub use version::CrmVersion;
