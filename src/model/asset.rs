use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inventory item offered or wanted by an intent.
///
/// Asset identity for graph-building and receipt purposes is the pair
/// `(platform, asset_id)` — `class_id`/`instance_id`/`metadata`/`proof` are
/// carried through for display and constraint-checking but never used to
/// distinguish one asset node from another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Asset {
    pub platform: String,
    pub app_id: String,
    pub context_id: String,
    pub asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AssetMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AssetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wear: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Asset {
    /// The `(platform, asset_id)` identity pair used everywhere an asset
    /// needs to be deduped or matched.
    pub fn fingerprint(&self) -> (String, String) {
        (self.platform.clone(), self.asset_id.clone())
    }

    /// The key this asset's USD value is looked up under in the external
    /// `asset_values_usd` table.
    pub fn value_key(&self) -> String {
        format!("{}:{}", self.platform, self.asset_id)
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.category.as_deref())
    }

    pub fn wear(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.wear.as_deref())
    }
}

/// Lookup table from asset fingerprint (`platform:asset_id`) to USD value.
pub type AssetValues = HashMap<String, f64>;

pub fn offer_value_usd(offer: &[Asset], values: &AssetValues) -> f64 {
    offer
        .iter()
        .map(|a| values.get(&a.value_key()).copied().unwrap_or(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(platform: &str, id: &str) -> Asset {
        Asset {
            platform: platform.to_string(),
            app_id: "730".to_string(),
            context_id: "2".to_string(),
            asset_id: id.to_string(),
            class_id: None,
            instance_id: None,
            metadata: None,
            proof: None,
        }
    }

    #[test]
    fn value_key_is_platform_colon_asset_id() {
        assert_eq!(asset("steam", "123").value_key(), "steam:123");
    }

    #[test]
    fn offer_value_sums_known_assets_and_ignores_unknown() {
        let offer = vec![asset("steam", "1"), asset("steam", "2")];
        let mut values = AssetValues::new();
        values.insert("steam:1".to_string(), 10.0);
        assert_eq!(offer_value_usd(&offer, &values), 10.0);
    }
}
