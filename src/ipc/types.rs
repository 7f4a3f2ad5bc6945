use serde::Deserialize;

use crate::jobs::ExportJobs;
use crate::store::CourseStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub store: CourseStore,
    pub jobs: ExportJobs,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            store: CourseStore::new(),
            jobs: ExportJobs::new(),
        }
    }
}
