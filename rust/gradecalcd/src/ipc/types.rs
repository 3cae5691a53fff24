use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::calc::CalcConfig;
use crate::config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    /// Effective calc settings: the workspace override when one is selected,
    /// defaults otherwise.
    pub fn calc_config(&self) -> CalcConfig {
        match self.db.as_ref() {
            Some(conn) => config::load_calc_config(conn),
            None => CalcConfig::default(),
        }
    }
}
