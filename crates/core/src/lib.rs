pub mod config;
pub mod context;
pub mod domain;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::customer::{CustomerId, CustomerSnapshot, LoanId};
pub use domain::ptp::{
    validate_candidate, BusinessRules, ExtractionCandidate, PtpRecord, PtpRejection,
};
