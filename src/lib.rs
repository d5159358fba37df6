// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! Named point-cloud cache with background loading and GPU buffer
//! lifecycle management.
//!
//! Nuage keeps large point clouds by name. Their data is generated, added
//! point by point, or loaded from delimited text files and network
//! payloads on a small pool of cancellable worker threads, and lives in
//! host memory, device buffers, or both.
//!
//! # Key entry points
//!
//! - [`registry::CloudRegistry`] - the name-keyed cache and its operations
//! - [`cloud::CloudBuffer`] - one cloud's CPU/GPU state machine
//! - [`source::SourceDescriptor`] - recorded provenance used to rebuild data
//! - [`task::TaskScheduler`] - bounded pool running [`task::Task`]s
//! - [`options::Options`] - runtime configuration (TOML)
//! - `fetch` (feature `fetch`) - blocking HTTP transport for network sources
//!
//! # Architecture
//!
//! Everything except load bodies runs on the thread owning the rendering
//! context. Loads write host arrays only; device buffers are synchronized
//! by the next [`cloud::CloudBuffer::draw`]. When the
//! [`gpu::DeviceBackend`] reports a new context, clouds whose host data was
//! discarded ("optimized") replay their source before drawing.

pub mod cloud;
pub mod error;
#[cfg(feature = "fetch")]
pub mod fetch;
pub mod gpu;
pub mod options;
pub mod registry;
pub mod source;
pub mod task;

pub use cloud::CloudBuffer;
pub use error::CloudError;
pub use options::Options;
pub use registry::{CloudRegistry, LookupMode};
pub use source::{ChannelSource, ColumnMap, RowLayout, SourceDescriptor};
