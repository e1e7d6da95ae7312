//! Market discovery
//!
//! Resolves a condition id into its outcome token ids through the Gamma API
//! and looks up a token's tick size on the CLOB.

use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{FairbookError, Result};
use crate::events::Outcome;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A binary market and its outcome tokens
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub condition_id: String,
    pub question: Option<String>,
    pub token_ids: HashMap<Outcome, String>,
}

impl MarketInfo {
    pub fn token_id(&self, outcome: Outcome) -> Option<&str> {
        self.token_ids.get(&outcome).map(String::as_str)
    }

    /// YES token first, then NO
    pub fn asset_ids(&self) -> Vec<String> {
        [Outcome::Yes, Outcome::No]
            .iter()
            .filter_map(|outcome| self.token_ids.get(outcome).cloned())
            .collect()
    }
}

/// HTTP client for the Gamma and CLOB REST endpoints
pub struct DiscoveryClient {
    http: reqwest::Client,
    gamma_endpoint: String,
    clob_endpoint: String,
}

impl DiscoveryClient {
    pub fn new(gamma_endpoint: &str, clob_endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("fairbook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            gamma_endpoint: gamma_endpoint.trim_end_matches('/').to_string(),
            clob_endpoint: clob_endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Look up the market for `condition_id` and map its outcomes to token ids
    pub async fn market_by_condition(&self, condition_id: &str) -> Result<MarketInfo> {
        let url = format!("{}/markets", self.gamma_endpoint);
        info!(condition_id, url = %url, "Fetching market from Gamma");

        let response: Value = self
            .http
            .get(&url)
            .query(&[("condition_ids", condition_id), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let market = response
            .as_array()
            .and_then(|markets| markets.first())
            .ok_or_else(|| {
                FairbookError::Discovery(format!("No market found for condition_id={}", condition_id))
            })?;

        let info = parse_gamma_market(condition_id, market)?;
        info!(condition_id, tokens = ?info.token_ids, "Market resolved");
        Ok(info)
    }

    /// Tick size currently in force for `token_id`
    pub async fn tick_size(&self, token_id: &str) -> Result<Decimal> {
        let url = format!("{}/book", self.clob_endpoint);
        debug!(token_id, url = %url, "Fetching tick size from CLOB");

        let response: Value = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_tick_size(token_id, &response)
    }
}

/// Decode a Gamma field that is itself a JSON-encoded string
fn json_string_field(market: &Value, field: &str) -> Result<Vec<String>> {
    let raw = market
        .get(field)
        .ok_or_else(|| FairbookError::Discovery(format!("Gamma response missing field '{}'", field)))?;

    // Some deployments return a real array instead of an encoded one
    let decoded = match raw {
        Value::String(encoded) => serde_json::from_str::<Value>(encoded).map_err(|e| {
            FairbookError::Discovery(format!("Failed to decode Gamma field '{}': {}", field, e))
        })?,
        other => other.clone(),
    };

    serde_json::from_value(decoded)
        .map_err(|e| FairbookError::Discovery(format!("Gamma field '{}' is not a string list: {}", field, e)))
}

fn parse_outcome(label: &str) -> Option<Outcome> {
    match label.trim().to_ascii_lowercase().as_str() {
        "yes" => Some(Outcome::Yes),
        "no" => Some(Outcome::No),
        _ => None,
    }
}

/// Map `outcomes[i]` to `clobTokenIds[i]`
pub fn parse_gamma_market(condition_id: &str, market: &Value) -> Result<MarketInfo> {
    let token_ids = json_string_field(market, "clobTokenIds")?;
    let outcomes = json_string_field(market, "outcomes")?;

    if token_ids.len() != outcomes.len() {
        return Err(FairbookError::Discovery(format!(
            "{} outcomes but {} token ids",
            outcomes.len(),
            token_ids.len()
        )));
    }

    let mut by_outcome = HashMap::new();
    for (label, token_id) in outcomes.iter().zip(token_ids) {
        let outcome = parse_outcome(label).ok_or_else(|| {
            FairbookError::Discovery(format!("Market is not binary: outcome '{}'", label))
        })?;
        by_outcome.insert(outcome, token_id);
    }

    if by_outcome.len() != 2 {
        return Err(FairbookError::Discovery(
            "Market must have exactly one YES and one NO token".to_string(),
        ));
    }

    Ok(MarketInfo {
        condition_id: condition_id.to_string(),
        question: market
            .get("question")
            .and_then(Value::as_str)
            .map(str::to_string),
        token_ids: by_outcome,
    })
}

/// Read `tick_size` from a CLOB `/book` response, string or number
pub fn parse_tick_size(token_id: &str, book: &Value) -> Result<Decimal> {
    let raw = match book.get("tick_size") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(FairbookError::Discovery(format!(
                "CLOB /book response missing tick_size for token_id={}",
                token_id
            )))
        }
    };

    let tick_size = Decimal::from_str(raw.trim())
        .map_err(|e| FairbookError::Discovery(format!("Bad tick_size '{}': {}", raw, e)))?;

    if tick_size <= Decimal::ZERO {
        return Err(FairbookError::InvalidTickSize(tick_size));
    }
    Ok(tick_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_gamma_market_encoded_fields() {
        let market = json!({
            "question": "Will it rain?",
            "outcomes": "[\"Yes\", \"No\"]",
            "clobTokenIds": "[\"111\", \"222\"]"
        });

        let info = parse_gamma_market("0xabc", &market).unwrap();
        assert_eq!(info.token_id(Outcome::Yes), Some("111"));
        assert_eq!(info.token_id(Outcome::No), Some("222"));
        assert_eq!(info.question.as_deref(), Some("Will it rain?"));
        assert_eq!(info.asset_ids(), vec!["111".to_string(), "222".to_string()]);
    }

    #[test]
    fn test_parse_gamma_market_reversed_outcomes() {
        let market = json!({
            "outcomes": ["No", "Yes"],
            "clobTokenIds": ["222", "111"]
        });

        let info = parse_gamma_market("0xabc", &market).unwrap();
        assert_eq!(info.token_id(Outcome::Yes), Some("111"));
        assert_eq!(info.token_id(Outcome::Yes.complement()), Some("222"));
    }

    #[test]
    fn test_parse_gamma_market_rejects_bad_shapes() {
        let missing = json!({ "outcomes": "[\"Yes\", \"No\"]" });
        assert!(matches!(
            parse_gamma_market("c", &missing),
            Err(FairbookError::Discovery(_))
        ));

        let not_binary = json!({
            "outcomes": "[\"Trump\", \"Harris\"]",
            "clobTokenIds": "[\"1\", \"2\"]"
        });
        assert!(parse_gamma_market("c", &not_binary).is_err());

        let mismatched = json!({
            "outcomes": "[\"Yes\", \"No\"]",
            "clobTokenIds": "[\"1\"]"
        });
        assert!(parse_gamma_market("c", &mismatched).is_err());

        let garbage = json!({ "outcomes": "[Yes", "clobTokenIds": "[]" });
        assert!(parse_gamma_market("c", &garbage).is_err());
    }

    #[test]
    fn test_parse_tick_size() {
        assert_eq!(parse_tick_size("t", &json!({ "tick_size": "0.01" })).unwrap(), dec!(0.01));
        assert_eq!(parse_tick_size("t", &json!({ "tick_size": 0.001 })).unwrap(), dec!(0.001));
        assert!(parse_tick_size("t", &json!({})).is_err());
        assert!(matches!(
            parse_tick_size("t", &json!({ "tick_size": "0" })),
            Err(FairbookError::InvalidTickSize(_))
        ));
    }
}
