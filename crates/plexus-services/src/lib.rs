//! # plexus-services
//!
//! Bus-facing service workers: [`VfsService`] bridges `vfs:*` request
//! topics to the object store and emits `telemetry.vfs` events;
//! [`ComputeService`] bridges `vm:create|kill|stdin` requests to the
//! compute runtime.
//! Deployments without a real AI backend or runtime wire in the
//! [`UnconfiguredAi`] / [`UnconfiguredCompute`] stand-ins, which answer
//! every call with a "not configured" error.

mod compute;
mod unconfigured;
mod vfs;

pub use compute::ComputeService;
pub use unconfigured::{UnconfiguredAi, UnconfiguredCompute};
pub use vfs::VfsService;
