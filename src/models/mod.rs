// src/models/mod.rs

pub mod activity;
pub mod attendance;
pub mod course;
pub mod grade;
pub mod material;
pub mod organization;
pub mod quiz;
pub mod user;
