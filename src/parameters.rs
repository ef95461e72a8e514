//! Work parameter records
//!
//! Parameter sets arrive from an external importer (spreadsheets and the like);
//! this crate only stores and returns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One process parameter of a work recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkParameter {
    /// Assigned by the store on first save.
    #[serde(default)]
    pub id: Option<u64>,
    pub step: u32,
    pub category: String,
    pub value: f64,
    #[serde(default)]
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

impl WorkParameter {
    pub fn new(step: u32, category: impl Into<String>, value: f64) -> Self {
        Self {
            id: None,
            step,
            category: category.into(),
            value,
            description: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// An imported batch of parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    #[serde(default)]
    pub id: Option<u64>,
    pub file_name: String,
    pub imported_at: DateTime<Utc>,
    pub parameters: Vec<WorkParameter>,
}

impl ParameterSet {
    pub fn new(file_name: impl Into<String>, parameters: Vec<WorkParameter>) -> Self {
        Self {
            id: None,
            file_name: file_name.into(),
            imported_at: Utc::now(),
            parameters,
        }
    }
}
