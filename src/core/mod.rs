pub mod calendar;
pub mod task;
