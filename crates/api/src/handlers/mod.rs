pub mod jobs;
pub mod solve;
