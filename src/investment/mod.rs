//! Investment positions and the daily accrual scheduler.

pub mod accrual;
pub mod positions;

pub use accrual::{AccrualFailure, AccrualReport, AccrualScheduler, AccruedPosition};
pub use positions::InvestmentBook;
