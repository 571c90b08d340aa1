pub mod backup_exchange;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod evaluations;
pub mod grades;
pub mod reports;
pub mod rules;
pub mod users;
