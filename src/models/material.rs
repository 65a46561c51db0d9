use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "material_type", rename_all = "snake_case")]
pub enum MaterialType {
    Pdf,
    Video,
    Document,
    Image,
    Link,
    Archive,
    Other,
}

/// Represents the 'materials' table. File contents are opaque; only the
/// stored path and size are known here.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Material {
    pub id: i64,
    pub course_id: i64,
    pub lesson_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub material_type: MaterialType,
    pub file_path: Option<String>,
    pub url: Option<String>,
    pub file_size: i64,
    pub download_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Material with its human-readable size.
#[derive(Debug, Serialize)]
pub struct MaterialView {
    #[serde(flatten)]
    pub material: Material,
    pub size_display: String,
}

impl From<Material> for MaterialView {
    fn from(material: Material) -> Self {
        let size_display = human_size(material.file_size);
        Self {
            material,
            size_display,
        }
    }
}

/// Where a download resolves to.
#[derive(Debug, Serialize)]
pub struct DownloadTarget {
    pub material_id: i64,
    pub location: String,
}

/// Formats a byte count as B / KB / MB / GB with one decimal.
pub fn human_size(size: i64) -> String {
    const KB: f64 = 1024.0;
    let bytes = size.max(0) as f64;
    if bytes < KB {
        format!("{} B", size.max(0))
    } else if bytes < KB * KB {
        format!("{:.1} KB", bytes / KB)
    } else if bytes < KB * KB * KB {
        format!("{:.1} MB", bytes / (KB * KB))
    } else {
        format!("{:.1} GB", bytes / (KB * KB * KB))
    }
}

/// DTO for registering a material. `file_path` refers to a blob already
/// placed under the media root; `url` is required for link materials.
#[derive(Debug, Deserialize, Validate)]
pub struct MaterialRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    pub material_type: MaterialType,
    pub lesson_id: Option<i64>,
    #[validate(length(min = 1, max = 500))]
    pub file_path: Option<String>,
    pub url: Option<String>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub file_size: i64,
    pub is_active: Option<bool>,
}

impl MaterialRequest {
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };

        if let Some(url) = &self.url {
            if Url::parse(url).is_err() {
                errors.add("url", ValidationError::new("invalid_url"));
            }
        }

        match self.material_type {
            MaterialType::Link if self.url.is_none() => {
                errors.add(
                    "url",
                    ValidationError::new("required").with_message("Link materials need a url".into()),
                );
            }
            MaterialType::Link => {}
            _ if self.file_path.is_none() && self.url.is_none() => {
                errors.add(
                    "file_path",
                    ValidationError::new("required")
                        .with_message("Provide a file path or a url".into()),
                );
            }
            _ => {}
        }

        if let Some(path) = &self.file_path {
            if path.contains("..") || path.starts_with('/') {
                errors.add("file_path", ValidationError::new("unsafe_path"));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(material_type: MaterialType) -> MaterialRequest {
        MaterialRequest {
            title: "Slides".to_string(),
            description: String::new(),
            material_type,
            lesson_id: None,
            file_path: None,
            url: None,
            file_size: 0,
            is_active: None,
        }
    }

    #[test]
    fn human_size_bands() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn link_material_requires_url() {
        let mut req = request(MaterialType::Link);
        assert!(req.check().is_err());
        req.url = Some("https://example.org/reading".to_string());
        assert!(req.check().is_ok());
    }

    #[test]
    fn file_material_rejects_traversal() {
        let mut req = request(MaterialType::Pdf);
        req.file_path = Some("../etc/passwd".to_string());
        assert!(req.check().is_err());
        req.file_path = Some("materials/2025/09/week1.pdf".to_string());
        assert!(req.check().is_ok());
    }
}
