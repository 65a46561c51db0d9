// src/handlers/mod.rs

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod catalog;
pub mod landing;
pub mod lessons;
pub mod materials;
pub mod quiz;
pub mod student;
pub mod teacher;
