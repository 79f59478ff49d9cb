//! juju-exporter-operator: reconciliation engine for the Juju exporter unit.
//!
//! Every triggering event runs one full, synchronous pass:
//!
//! ```text
//! Event
//!   └── StatusReconciler::reconcile
//!         ├── validate(RawConfig)            → Blocked on field errors
//!         ├── Host::collector_installed()    → Waiting if absent
//!         ├── AgentConfigRenderer::apply     → atomic write, restart on change
//!         ├── open/close scrape port
//!         ├── RelationPublisher::publish     → compare-then-write per bag
//!         └── Host::collector_running()      → Active / Blocked
//! ```
//!
//! The surrounding event layer is reached only through the [`Host`] trait,
//! so a pass is a plain function call in tests.

pub mod error;
pub mod host;
pub mod reconcile;
pub mod relations;
pub mod render;

pub use error::{HostError, PublishError, RenderError};
pub use host::{AgentConf, BagScope, DataBag, Host, MemoryHost, OpenedPort, RelationHandle, UnitIdentity};
pub use reconcile::{Event, StatusReconciler, Step};
pub use relations::{PublishReport, RelationInterface, RelationPayload, RelationPublisher};
pub use render::{AgentConfigDocument, AgentConfigRenderer, RenderOutcome, DEFAULT_AGENT_CONFIG_PATH};
