//! Fleet alert lifecycle daemon: state-machine services, rule engine,
//! auto-close scanner, and the interval scheduler that drives it.

pub mod alert_id;
pub mod alert_service;
pub mod engine;
pub mod job_service;
pub mod rule_cache;
pub mod rule_service;
pub mod scanner;
pub mod scheduler;

pub use alert_id::AlertIdGenerator;
pub use alert_service::AlertService;
pub use engine::{RuleEngine, ScanStats};
pub use job_service::JobService;
pub use rule_service::RuleService;
pub use scanner::{ScanReport, Scanner, SCANNER_JOB_TYPE};
pub use scheduler::{ScannerScheduler, SchedulerStatus};
