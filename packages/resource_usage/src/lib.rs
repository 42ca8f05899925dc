#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Per-test resource usage reporting for test execution hosts.
//!
//! This package measures the resources consumed by a single unit of work (typically the call
//! phase of one test) and reports them alongside the normal pass/fail results:
//!
//! - running time, requested with the `report_duration` marker;
//! - peak unique set size (USS) of the process tree, requested with the `report_uss` marker
//!   and sampled from a separate helper process;
//! - peak traced heap allocations, requested with the `report_tracemalloc` marker and
//!   measured by the tracking [`Allocator`].
//!
//! The core functionality includes:
//! - [`ResourceUsage`] - Host integration: wraps the call phase of a test and prints the
//!   end-of-run summary
//! - [`UssSampler`] - Tracks the peak USS of a process tree from a forked helper process
//! - [`OnDemandValue`] - Hands a value from one process to another on demand
//! - [`HeapTraceSession`] - Tracks the peak traced heap size over a unit of work
//! - [`ResourceSummary`] - Aggregates the annotations of a run into a summary section
//!
//! The host is abstracted behind a small data model ([`TestItem`], [`TestReport`], [`RunLog`])
//! and two collaborator traits ([`MarkerRegistry`], [`SummaryWriter`]).
//!
//! # Simple usage
//!
//! ```
//! use resource_usage::{
//!     Marker, Outcome, ResourceUsage, RunLog, Stage, TerminalWriter, TestItem, TestReport,
//! };
//!
//! let plugin = ResourceUsage::new();
//! let mut log = RunLog::new();
//!
//! let mut item = TestItem::new("tests/test_math.rs::adds").marker(Marker::report_duration());
//! let sum = plugin.run_call(&mut item, || 2 + 2).unwrap();
//! assert_eq!(sum, 4);
//!
//! log.record(TestReport::from_item(&item, Stage::Call, Outcome::Passed));
//!
//! let mut writer = TerminalWriter::new(std::io::stdout());
//! plugin.terminal_summary(&log, &mut writer).unwrap();
//! ```
//!
//! # Heap tracing
//!
//! Heap tracing only observes allocations made through the tracking allocator, so the
//! binary that runs the tests must install it:
//!
//! ```
//! use resource_usage::Allocator;
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
//! ```
//!
//! # Platform support
//!
//! Peak USS sampling reads `/proc` and relies on `fork()`, so it is only available on Linux.
//! Elsewhere a test marked with `report_uss` fails with [`Error::Unsupported`].
//!
//! # Miri compatibility
//!
//! Miri replaces the global allocator with its own logic and does not support `fork()`, so
//! heap tracing and USS sampling cannot be exercised under Miri.

mod error;
mod format;
mod heap;
mod heap_session;
mod markers;
mod plugin;
mod report;

#[cfg(target_os = "linux")]
mod on_demand;
#[cfg(target_os = "linux")]
mod pal;
#[cfg(target_os = "linux")]
mod process_tree;
#[cfg(target_os = "linux")]
mod uss;

pub use error::*;
pub use format::*;
pub use heap::*;
pub use heap_session::*;
pub use markers::*;
#[cfg(target_os = "linux")]
pub use on_demand::*;
pub use plugin::*;
#[cfg(target_os = "linux")]
pub use process_tree::*;
pub use report::*;
#[cfg(target_os = "linux")]
pub use uss::*;

