//! # Crawler Module
//!
//! The crawl engine: admission, the periodic control loop, and the per-item
//! request state machine.
//!
//! ## Overview
//!
//! The engine owns the shared state of a crawl (the fetch queue, the cookie
//! jar, the robots registry, the admission predicate sets, and the event
//! bus) and coordinates it from a single control-loop task. Requests run as
//! spawned tasks bounded by `max_concurrency`; every lifecycle transition is
//! published on the event bus.
//!
//! ## Internal Components
//!
//! - `core`: the `Crawler` handle, control loop, admission pipeline, robots
//!   gating, wait holds, and completion detection
//! - `request`: the per-item HTTP state machine (spool → headers → download
//!   → terminal), including decompression, charset decoding, conditional
//!   fetches, and resource discovery

mod core;
mod request;

pub use core::{Crawler, WaitHold};
