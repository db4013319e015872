//! Outbound-networking support for the authorization subsystem
//!
//! The only resident here is the [`hooks::HookPipeline`], an explicit,
//! constructed object carrying request-URL rewriters and response observers.
//! It is passed to the discovery and provider layers rather than living in
//! process-wide state, so hook ordering and lifetime stay test-deterministic.

pub mod hooks;

pub use hooks::HookPipeline;
