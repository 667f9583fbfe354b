//! Live MPEG-DASH segment availability validator.
//!
//! ```text
//! ┌──────────────────┐  refresh   ┌──────────────────┐  plan   ┌───────────────────┐
//! │                  ├────────────►                  ├─────────►                   │
//! │  ManifestSource  │  snapshot  │   LiveManifest   │         │     Scheduler     │
//! │                  │            │     [merge]      ◄──┐      │  [tick, one-shot] │
//! └──────────────────┘            └──────────────────┘  │      └─────────┬─────────┘
//!                                                       │                │ dispatch
//!                                 ┌──────────────────┐  │      ┌─────────▼─────────┐
//!                                 │                  │  │      │                   │
//!                                 │    Correlator    ├──┘      │   Prober [HEAD]   │
//!                                 │  [RTT, skew]     ◄─────────┤                   │
//!                                 │                  │ [MPSC]  └───────────────────┘
//!                                 └────────┬─────────┘
//!                                          │ Report
//!                                          ▼
//! ```
//!
//! Every arrow into [model::LiveManifest] runs on the [Validator] event loop.

pub mod clock;
pub mod config;
pub mod correlator;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod model;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod timing;
pub mod util;
pub mod validator;

pub use clock::{Clock, RuntimeClock, SystemClock};
pub use config::ValidatorConfig;
pub use error::{MadoError, MadoResult};
pub use probe::{HttpProber, ProbeResponse, Prober};
pub use report::{Progress, Report};
pub use source::{HttpManifestSource, ManifestSource};
pub use tokio_util::sync::CancellationToken;
pub use util::http::HttpClient;
pub use validator::{ManifestState, Validator};
