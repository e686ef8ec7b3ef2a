//! Database access for the harvesting core

pub mod facts;
pub mod harvests;
pub mod providers;
