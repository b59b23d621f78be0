//! # taktplan-parser
//!
//! Loader for the sectioned-CSV catalog document consumed by the taktplan
//! scheduling engine.
//!
//! A catalog document is a single text file partitioned by
//! `==== SECTION NAME ====` delimiter lines; each section is a CSV table
//! with a header row. Loading parses the tables in a fixed order, expands
//! per-product task instances (with quality/customer inspection sidecars,
//! late parts and rework), and returns a fully populated
//! [`taktplan_core::Catalog`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! let catalog = taktplan_parser::load_catalog(Path::new("scheduling_data.csv"))?;
//! println!("{} task instances", catalog.instances.len());
//! # Ok::<(), taktplan_core::LoadError>(())
//! ```

pub mod expand;
pub mod loader;
pub mod sections;

pub use expand::{baseline_instance_id, quality_team_for, trace_baseline};
pub use loader::{default_epoch, load_catalog, parse_catalog, parse_catalog_with_epoch};
pub use sections::{split_sections, Table};
