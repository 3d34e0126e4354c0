use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::field::FieldName;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_values: Option<Vec<String>>,
}

fn default_active() -> bool {
    true
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self { active: true, fixed_values: None }
    }
}

impl FieldConfig {
    pub fn inactive() -> Self {
        Self { active: false, fixed_values: None }
    }

    pub fn fixed<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { active: true, fixed_values: Some(values.into_iter().map(Into::into).collect()) }
    }
}

/// Per-user field configuration, snapshotted onto each record when a dialog starts.
///
/// Fields missing from the map are active and resolved through live lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub fields: BTreeMap<FieldName, FieldConfig>,
}

impl UserSettings {
    pub fn with_field(mut self, field: FieldName, config: FieldConfig) -> Self {
        self.fields.insert(field, config);
        self
    }

    pub fn is_active(&self, field: FieldName) -> bool {
        self.fields.get(&field).map(|config| config.active).unwrap_or(true)
    }

    /// A configured fixed list; an empty list counts as "not configured".
    pub fn fixed_values(&self, field: FieldName) -> Option<&[String]> {
        self.fields
            .get(&field)
            .and_then(|config| config.fixed_values.as_deref())
            .filter(|values| !values.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub chat_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, flatten)]
    pub settings: UserSettings,
}
