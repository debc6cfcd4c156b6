//! # Map Tile Download Tasks
//!
//! Orchestrates map tile download tasks against a remote tile downloader.
//!
//! ## Features
//!
//! - One task per (tile kind, zoom level) over a selected region
//! - Progress polling every 1 second, one poller per task
//! - Pause, resume and rate-limited toggle of individual tasks
//! - Finished tasks are released on the downloader and forgotten
//! - Debounce and throttle wrappers for bursty callers

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod limiter;
pub mod poller;
pub mod registry;

pub use client::{Downloader, HttpDownloader};
pub use config::{Config, ControllerConfig, DownloaderConfig, DEFAULT_BASE_URL};
pub use controller::{BatchOutcome, TaskController};
pub use error::{TaskError, TaskResult};
pub use event::ProgressEvent;
pub use limiter::{Debounce, Throttle};
pub use poller::aggregator::AggregatedProgress;
pub use registry::task::{
    LngLat, Projection, Region, RemoteProgress, SelectionField, Task, TaskId, TaskSpec, TaskState,
    TileKind, TileRef,
};
pub use registry::TaskRegistry;
