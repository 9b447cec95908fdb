use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::asset::Asset;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CategoryConstraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptable_wear: Vec<String>,
}

/// Algebraic want specification: what an intent is willing to accept in
/// return for its offer. Dispatch is always by `type` tag, never by a
/// downcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WantSpec {
    Set {
        any_of: Vec<WantSpec>,
    },
    SpecificAsset {
        platform: String,
        asset_key: String,
    },
    Category {
        platform: String,
        app_id: String,
        category: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraints: Option<CategoryConstraints>,
    },
}

impl WantSpec {
    /// Whether `offer` satisfies this want specification, per spec.md §4.1.
    pub fn is_satisfied_by(&self, offer: &[Asset]) -> bool {
        match self {
            WantSpec::SpecificAsset { platform, asset_key } => offer.iter().any(|a| {
                if &a.platform != platform {
                    return false;
                }
                let literal = format!("steam:{}", a.asset_id);
                &literal == asset_key || &a.asset_id == asset_key
            }),
            WantSpec::Category {
                platform,
                app_id,
                category,
                constraints,
            } => offer.iter().any(|a| {
                if &a.platform != platform || &a.app_id != app_id {
                    return false;
                }
                if a.category() != Some(category.as_str()) {
                    return false;
                }
                if let Some(c) = constraints {
                    if !c.acceptable_wear.is_empty() {
                        let Some(wear) = a.wear() else {
                            return false;
                        };
                        if !c.acceptable_wear.iter().any(|w| w == wear) {
                            return false;
                        }
                    }
                }
                true
            }),
            WantSpec::Set { any_of } => any_of.iter().any(|spec| spec.is_satisfied_by(offer)),
        }
    }
}
