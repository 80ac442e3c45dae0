//! Table viewer for AIFA dashboard exports: free text search across rows, per
//! column facet filters and the terminal front end that drives them.

pub mod controller;
pub mod dataset;
pub mod domain;
pub mod filter;
pub mod headless;
pub mod inputter;
pub mod loader;
pub mod model;
pub mod popover;
pub mod ui;
pub mod value;
