//! `lookup_customer` — find a customer (with vehicles and upcoming
//! appointments) by phone, through the snapshot cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use revline_core::phone;
use revline_db::appointments::AppointmentRepo;
use revline_db::customers::CustomerRepo;
use revline_llm::{ToolOutcome, VoiceTool};
use revline_store::CustomerSnapshot;

use super::{required_str, ToolContext};

/// Cache-then-database customer lookup. Shared with session initialization
/// so both paths populate the same snapshot.
pub async fn load_customer_snapshot(
    ctx: &ToolContext,
    raw_phone: &str,
) -> Result<Option<CustomerSnapshot>, String> {
    let normalized = phone::normalize(raw_phone).map_err(|e| e.to_string())?;

    if let Some(snapshot) = ctx.store.get_cached_customer(&normalized).await {
        debug!(phone = %phone::mask(&normalized), "customer cache hit");
        return Ok(Some(snapshot));
    }

    let Some((customer, vehicles)) = CustomerRepo::new(&ctx.db)
        .find_by_phone_with_vehicles(&normalized)
        .map_err(|e| e.to_string())?
    else {
        return Ok(None);
    };

    let upcoming = AppointmentRepo::new(&ctx.db)
        .upcoming_for_customer(customer.id, 10)
        .map_err(|e| e.to_string())?;

    let snapshot = CustomerSnapshot {
        customer: serde_json::to_value(&customer).map_err(|e| e.to_string())?,
        vehicles: vehicles
            .iter()
            .filter_map(|v| serde_json::to_value(v).ok())
            .collect(),
        upcoming_appointments: upcoming
            .iter()
            .filter_map(|a| serde_json::to_value(a).ok())
            .collect(),
        cached_at: Utc::now(),
    };

    // best effort; a failed cache write only costs the next lookup a query
    let _ = ctx.store.cache_customer(&normalized, &snapshot).await;
    Ok(Some(snapshot))
}

pub struct LookupCustomerTool {
    ctx: Arc<ToolContext>,
}

impl LookupCustomerTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for LookupCustomerTool {
    fn name(&self) -> &str {
        "lookup_customer"
    }

    fn description(&self) -> &str {
        "Look up a customer by phone number. Returns the customer record with their \
         vehicles and upcoming appointments, or found=false when there is no record."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "phone": {
                    "type": "string",
                    "description": "Customer phone number in any common format."
                }
            },
            "required": ["phone"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(raw_phone) = required_str(&args, "phone") else {
            return ToolOutcome::fail("missing_argument", "'phone' is required");
        };

        match load_customer_snapshot(&self.ctx, raw_phone).await {
            Ok(Some(snapshot)) => ToolOutcome::ok(json!({
                "found": true,
                "customer": snapshot.customer,
                "vehicles": snapshot.vehicles,
                "upcoming_appointments": snapshot.upcoming_appointments,
            })),
            Ok(None) => ToolOutcome::ok_with_message(
                json!({ "found": false }),
                "No customer on file for that number",
            ),
            Err(e) => ToolOutcome::fail("lookup_failed", e),
        }
    }
}
