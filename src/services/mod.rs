pub mod activity;
pub mod assistant;
pub mod attendance;
pub mod grades;
pub mod progress;
pub mod quiz_engine;
