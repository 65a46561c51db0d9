use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Faculty {
    pub id: i64,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub faculty_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFacultyRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 20))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDepartmentRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub faculty_id: i64,
}
