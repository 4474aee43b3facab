//! Mock Response Resolver
//!
//! Decides what a hosted mock API sends back. Given an incoming request and
//! the configuration of the mock endpoint it hit, the engine picks one of the
//! endpoint's response candidates, fills in its template tokens, waits out
//! the configured delay, and records what happened.
//!
//! # Features
//!
//! - **Conditional Matching**: Match candidates on headers, query params,
//!   JSON body fields, and path params with `equals`, `contains`, or `regex`
//! - **Weighted Selection**: Pick among matching candidates by weight
//! - **Default Fallback**: Serve the default candidate when nothing matches
//! - **Dynamic Templates**: `{{uuid}}` and `{{iso_date}}` in bodies and headers
//! - **Latency Simulation**: Per-endpoint delay with a hard ceiling
//! - **Request Logging**: Fire-and-forget log records for every resolution
//!
//! # Example Configuration
//!
//! ```yaml
//! projects:
//!   - slug: demo
//!     mocks:
//!       - mock_id: hello
//!         method: GET
//!         path: /hello
//!         responses:
//!           - response_id: hello-ok
//!             status_code: 200
//!             body: '{"message": "Hello, World!", "id": "{{uuid}}"}'
//!             is_default: 1
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod log_sink;
pub mod matcher;
pub mod model;
pub mod regex_cache;
pub mod request;
pub mod selector;
pub mod store;
pub mod template;

pub use config::{EngineSettings, ResolverConfig};
pub use engine::{Resolution, ResolutionEngine, ResolutionResult, ServedResponse};
pub use log_sink::{LogSink, Outcome, RequestLog};
pub use model::{Condition, MockEndpoint, ResponseCandidate};
pub use request::RequestView;
pub use store::{EndpointCache, EndpointStore, InMemoryEndpointStore};
