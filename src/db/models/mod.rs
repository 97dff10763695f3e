pub mod report;

pub use report::{Admission, DamageType, MediaType, Report, ReportSource, Severity};
