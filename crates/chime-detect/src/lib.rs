//! chime-detect: answer-completion detection for AI chat tabs
//!
//! Each open tab runs a [`CompletionEngine`] that watches the page through a
//! site adapter and decides when a streamed answer has really finished. The
//! [`Host`] ties tabs together: it relays keep-alive pulses, watches streaming
//! requests to the sites' answer endpoints and forwards completions to a
//! [`chime_notify::Notifier`].

pub mod adapter;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod handle;
pub mod host;
pub mod page;
pub mod tracker;

pub use adapter::SiteAdapter;
pub use driver::{HostEnvelope, TabDriver};
pub use engine::{CompletionEngine, EngineAction, EngineState, Timings};
pub use error::Error;
pub use events::{HostMessage, NetworkFinished, TabId, TabMessage};
pub use handle::TabHandle;
pub use host::{Host, HostConfig, HostEvent, Source, TabInfo};
pub use page::{LivePage, Page, PageSnapshot};
pub use tracker::{NetworkStreamTracker, StreamPattern};
