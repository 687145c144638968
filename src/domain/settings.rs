//! Team Settings
//!
//! Settings live as a JSON object on the team row. Reads always see the full
//! default tree with stored values laid over it, so a team created before a
//! key existed still answers for it.

use serde_json::{json, Map, Value};

use super::TeamRole;
use crate::error::{ApiError, ApiResult};

/// Every settable path, grouped by category.
const KNOWN_KEYS: &[(&str, &[&str])] = &[
    (
        "security",
        &[
            "allow_public_invites",
            "require_approval",
            "default_role",
            "allow_guest_access",
        ],
    ),
    (
        "features",
        &[
            "enable_team_analytics",
            "enable_file_sharing",
            "max_file_size",
            "enable_team_chat",
        ],
    ),
    (
        "permissions",
        &[
            "members_can_create_projects",
            "members_can_invite",
            "guests_can_view",
        ],
    ),
];

pub fn default_settings() -> Value {
    json!({
        "security": {
            "allow_public_invites": false,
            "require_approval": true,
            "default_role": TeamRole::Member.code(),
            "allow_guest_access": false,
        },
        "features": {
            "enable_team_analytics": true,
            "enable_file_sharing": true,
            "max_file_size": 100,
            "enable_team_chat": true,
        },
        "permissions": {
            "members_can_create_projects": false,
            "members_can_invite": false,
            "guests_can_view": true,
        },
    })
}

/// Effective settings plus the sparse overrides they were built from. Only
/// the overrides are ever persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamSettings {
    effective: Value,
    overrides: Value,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            effective: default_settings(),
            overrides: Value::Object(Map::new()),
        }
    }
}

impl TeamSettings {
    /// Overlay whatever is stored on top of the defaults.
    pub fn from_stored(stored: &Value) -> Self {
        let mut settings = Self::default();
        if let Some(stored) = stored.as_object() {
            overlay(&mut settings.effective, stored);
            overlay(&mut settings.overrides, stored);
        }
        settings
    }

    pub fn into_value(self) -> Value {
        self.effective
    }

    /// The keys this team has set explicitly.
    pub fn overrides(&self) -> &Value {
        &self.overrides
    }

    /// Dot-notation lookup, e.g. `security.default_role`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.effective, |node, key| node.as_object().and_then(|m| m.get(key)))
    }

    pub fn flag(&self, path: &str) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Role granted to approved join requests.
    pub fn default_role(&self) -> TeamRole {
        self.get("security.default_role")
            .and_then(Value::as_i64)
            .and_then(TeamRole::from_code)
            .unwrap_or(TeamRole::Member)
    }

    /// Validate and write a single path, creating intermediate objects.
    pub fn set(&mut self, path: &str, value: Value) -> ApiResult<()> {
        let (category, key) = split_path(path)?;
        validate(category, key, &value)?;

        put(&mut self.overrides, category, key, value.clone());
        put(&mut self.effective, category, key, value);
        Ok(())
    }

    /// Deep-merge a `{category: {key: value}}` patch. All entries are
    /// validated before anything is written.
    pub fn merge(&mut self, patch: &Value) -> ApiResult<()> {
        let patch = patch
            .as_object()
            .ok_or_else(|| ApiError::bad_request("Settings must be a JSON object"))?;

        let mut updates = Vec::new();
        for (category, values) in patch {
            let values = values.as_object().ok_or_else(|| {
                ApiError::field(category, "Expected an object of settings")
            })?;
            for (key, value) in values {
                validate(category, key, value)?;
                updates.push((format!("{}.{}", category, key), value.clone()));
            }
        }

        for (path, value) in updates {
            self.set(&path, value)?;
        }
        Ok(())
    }
}

fn overlay(target: &mut Value, stored: &Map<String, Value>) {
    let target = object_mut(target);
    for (key, value) in stored {
        match (target.get_mut(key), value) {
            (Some(existing @ Value::Object(_)), Value::Object(inner)) => overlay(existing, inner),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn put(root: &mut Value, category: &str, key: &str, value: Value) {
    let node = object_mut(root)
        .entry(category.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    object_mut(node).insert(key.to_string(), value);
}

fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn split_path(path: &str) -> ApiResult<(&str, &str)> {
    let mut parts = path.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(category), Some(key), None) if !category.is_empty() && !key.is_empty() => {
            Ok((category, key))
        }
        _ => Err(ApiError::bad_request(format!(
            "Invalid setting path '{}', expected category.key",
            path
        ))),
    }
}

fn validate(category: &str, key: &str, value: &Value) -> ApiResult<()> {
    let keys = KNOWN_KEYS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, keys)| *keys)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown settings category '{}'", category)))?;

    if !keys.contains(&key) {
        return Err(ApiError::bad_request(format!(
            "Unknown setting '{}.{}'",
            category, key
        )));
    }

    let path = format!("{}.{}", category, key);
    match (category, key) {
        ("security", "default_role") => match value.as_i64().and_then(TeamRole::from_code) {
            Some(TeamRole::Admin | TeamRole::Member | TeamRole::Guest) => Ok(()),
            _ => Err(ApiError::field(
                &path,
                "Default role must be Admin (2), Member (3) or Guest (4)",
            )),
        },
        ("features", "max_file_size") => match value.as_i64() {
            Some(size) if (1..=1000).contains(&size) => Ok(()),
            _ => Err(ApiError::field(
                &path,
                "Max file size must be an integer between 1 and 1000 MB",
            )),
        },
        _ if value.is_boolean() => Ok(()),
        _ => Err(ApiError::field(&path, "Must be a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_values_overlay_defaults() {
        let stored = json!({"permissions": {"members_can_invite": true}});
        let settings = TeamSettings::from_stored(&stored);
        assert!(settings.flag("permissions.members_can_invite"));
        // Untouched siblings keep their defaults.
        assert!(settings.flag("permissions.guests_can_view"));
        assert!(!settings.flag("permissions.members_can_create_projects"));
        assert_eq!(settings.get("features.max_file_size"), Some(&json!(100)));
    }

    #[test]
    fn test_empty_store_yields_defaults() {
        let settings = TeamSettings::from_stored(&json!({}));
        assert_eq!(settings, TeamSettings::default());
        assert_eq!(settings.default_role(), TeamRole::Member);
        assert!(settings.get("security.nope").is_none());
    }

    #[test]
    fn test_overrides_stay_sparse() {
        let mut settings = TeamSettings::from_stored(&json!({"security": {"default_role": 4}}));
        settings.set("permissions.members_can_invite", json!(true)).unwrap();
        assert_eq!(
            settings.overrides(),
            &json!({
                "security": {"default_role": 4},
                "permissions": {"members_can_invite": true},
            })
        );
        assert_eq!(settings.get("features.max_file_size"), Some(&json!(100)));
        assert_eq!(TeamSettings::default().overrides(), &json!({}));
    }

    #[test]
    fn test_set_validates() {
        let mut settings = TeamSettings::default();
        settings.set("security.default_role", json!(4)).unwrap();
        assert_eq!(settings.default_role(), TeamRole::Guest);

        assert!(settings.set("security.default_role", json!(1)).is_err());
        assert!(settings.set("features.max_file_size", json!(0)).is_err());
        assert!(settings.set("features.max_file_size", json!(1001)).is_err());
        assert!(settings.set("features.max_file_size", json!(1000)).is_ok());
        assert!(settings.set("features.enable_team_chat", json!("yes")).is_err());
        assert!(settings.set("billing.plan", json!(true)).is_err());
        assert!(settings.set("security.unknown", json!(true)).is_err());
        assert!(settings.set("security", json!(true)).is_err());
    }

    #[test]
    fn test_merge_is_all_or_nothing() {
        let mut settings = TeamSettings::default();
        let patch = json!({
            "permissions": {"members_can_create_projects": true},
            "features": {"max_file_size": 5000},
        });
        assert!(settings.merge(&patch).is_err());
        assert!(!settings.flag("permissions.members_can_create_projects"));

        let patch = json!({"permissions": {"members_can_create_projects": true}});
        settings.merge(&patch).unwrap();
        assert!(settings.flag("permissions.members_can_create_projects"));
        assert!(!settings.flag("permissions.members_can_invite"));
    }
}
