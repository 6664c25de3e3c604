use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Body shared by the monitor and reset-collection endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct RepositoryActionRequest {
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub start_time: Option<String>,
}

/// Validated form: lower-cased names plus the parsed optional start time.
#[derive(Debug)]
pub struct RepositoryAction {
    pub owner: String,
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
}

impl RepositoryActionRequest {
    pub fn validate(self) -> Result<RepositoryAction> {
        let mut fields = BTreeMap::new();
        if self.repo_name.trim().is_empty() {
            fields.insert("repo_name".to_string(), "cannot be blank".to_string());
        }
        if self.owner_name.trim().is_empty() {
            fields.insert("owner_name".to_string(), "cannot be blank".to_string());
        }
        if !fields.is_empty() {
            return Err(Error::Validation(fields));
        }

        let start_time = match self.start_time.as_deref().filter(|raw| !raw.is_empty()) {
            None => None,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(_) => {
                    let mut fields = BTreeMap::new();
                    fields.insert(
                        "start_time".to_string(),
                        "must be a valid RFC3339 timestamp".to_string(),
                    );
                    return Err(Error::Validation(fields));
                }
            },
        };

        Ok(RepositoryAction {
            owner: self.owner_name.to_lowercase(),
            name: self.repo_name.to_lowercase(),
            start_time,
        })
    }
}
