pub mod types;
pub mod naming;
pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use types::{
    Expectation, ExpectationKind, Registration, RegistrationFile, Report, ReportEntry, Submission,
};
pub use config::Config;
pub use error::{ExecutionFailure, ExecutionOutcome, HarnessError};
