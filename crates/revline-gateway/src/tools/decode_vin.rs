//! `decode_vin` — decode a VIN via the public decode API, with a 7-day
//! cache and a hard 5-second deadline on the upstream call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use revline_core::vin;
use revline_llm::{ToolOutcome, VoiceTool};
use revline_store::VinRecord;

use super::{required_str, ToolContext};

pub struct DecodeVinTool {
    ctx: Arc<ToolContext>,
}

impl DecodeVinTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for DecodeVinTool {
    fn name(&self) -> &str {
        "decode_vin"
    }

    fn description(&self) -> &str {
        "Decode a 17-character VIN into year, make, model, and trim. Use when the \
         caller reads out a VIN for a vehicle not on file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "vin": {
                    "type": "string",
                    "description": "17-character VIN (letters I, O, Q never appear)."
                }
            },
            "required": ["vin"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(raw_vin) = required_str(&args, "vin") else {
            return ToolOutcome::fail("missing_argument", "'vin' is required");
        };
        let canonical = match vin::normalize(raw_vin) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::fail("invalid_vin", e.to_string()),
        };

        if let Some(cached) = self.ctx.store.get_cached_vin(&canonical).await {
            debug!(vin = %canonical, "VIN cache hit");
            return ToolOutcome::ok(record_to_data(&cached));
        }

        let url = format!(
            "{}/{}?format=json",
            self.ctx.config.vin.endpoint.trim_end_matches('/'),
            canonical
        );
        let timeout = Duration::from_secs(self.ctx.config.vin.timeout_secs);

        let resp = match tokio::time::timeout(timeout, self.ctx.http.get(&url).send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(vin = %canonical, error = %e, "VIN decode request failed");
                return ToolOutcome::fail("upstream_error", e.to_string());
            }
            Err(_) => {
                warn!(vin = %canonical, secs = self.ctx.config.vin.timeout_secs, "VIN decode timed out");
                return ToolOutcome::fail("timeout", "the VIN decoder took too long");
            }
        };

        if !resp.status().is_success() {
            return ToolOutcome::fail(
                "upstream_error",
                format!("decoder returned {}", resp.status().as_u16()),
            );
        }

        let body: Value = match tokio::time::timeout(timeout, resp.json()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return ToolOutcome::fail("upstream_error", e.to_string()),
            Err(_) => return ToolOutcome::fail("timeout", "the VIN decoder took too long"),
        };

        let Some(result) = body
            .get("Results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
        else {
            return ToolOutcome::fail("upstream_error", "decoder returned no results");
        };

        let record = VinRecord {
            vin: canonical.clone(),
            year: nonempty(result, "ModelYear"),
            make: nonempty(result, "Make"),
            model: nonempty(result, "Model"),
            trim: nonempty(result, "Trim"),
            body_class: nonempty(result, "BodyClass"),
            engine: nonempty(result, "EngineModel"),
            cached_at: Utc::now(),
        };

        if record.make.is_none() && record.model.is_none() {
            // decoder answered but recognized nothing; don't cache junk
            return ToolOutcome::fail("decode_failed", "that VIN did not decode to a vehicle");
        }

        let _ = self.ctx.store.cache_vin(&canonical, &record).await;
        ToolOutcome::ok(record_to_data(&record))
    }
}

fn nonempty(result: &Value, key: &str) -> Option<String> {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn record_to_data(record: &VinRecord) -> Value {
    json!({
        "vin": record.vin,
        "year": record.year,
        "make": record.make,
        "model": record.model,
        "trim": record.trim,
        "body_class": record.body_class,
        "engine": record.engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonempty_filters_blank_fields() {
        let result = json!({ "Make": "HONDA", "Trim": "", "Model": "  " });
        assert_eq!(nonempty(&result, "Make").as_deref(), Some("HONDA"));
        assert_eq!(nonempty(&result, "Trim"), None);
        assert_eq!(nonempty(&result, "Model"), None);
        assert_eq!(nonempty(&result, "Missing"), None);
    }
}
