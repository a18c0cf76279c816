pub mod daily;
pub mod summary;

pub use daily::build_daily_report;
pub use summary::build_summary_report;
