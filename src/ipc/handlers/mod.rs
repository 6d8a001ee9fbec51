pub mod approvals;
pub mod attendance;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod fees;
pub mod merit;
pub mod parents;
pub mod reports;
pub mod results;
pub mod students;
pub mod subjects;
pub mod teachers;
