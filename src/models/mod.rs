pub mod fitting;
pub mod job;
