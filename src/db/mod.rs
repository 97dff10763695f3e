mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::{Database, ReportSnapshot};
pub use models::{Admission, DamageType, MediaType, Report, ReportSource, Severity};
