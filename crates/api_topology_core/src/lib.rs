//! Serverless API topology and delivery pipeline primitives.
//!
//! This crate turns a compact endpoint table into a deployable description
//! (functions, routes, a shared authorizer, environment references and the
//! published URL parameter) and plans the delivery pipeline that ships it. It
//! performs no I/O: AWS clients, process execution and the binaries live in
//! `api_topology_deploy`.

pub mod endpoints;
pub mod environment;
pub mod error;
pub mod parameter_keys;
pub mod pipeline;
pub mod profile;
pub mod qa_gate;
pub mod template;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod topology;

pub use error::{PipelineError, TopologyError};
pub use pipeline::run::{run_pipeline, PipelineReport, PipelineStatus};
pub use pipeline::{plan_pipeline, PipelineConfig, PipelinePlan};
pub use template::{render_template, RenderedTemplate};
pub use topology::{assemble_topology, ServiceTopology, TopologyConfig};
