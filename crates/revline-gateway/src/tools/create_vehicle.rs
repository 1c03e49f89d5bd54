//! `create_vehicle` — add a vehicle to a customer so it can be booked.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use revline_db::customers::CustomerRepo;
use revline_db::types::NewVehicle;
use revline_db::vehicles::VehicleRepo;
use revline_db::DbError;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_i64, required_str, ToolContext};

pub struct CreateVehicleTool {
    ctx: Arc<ToolContext>,
}

impl CreateVehicleTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for CreateVehicleTool {
    fn name(&self) -> &str {
        "create_vehicle"
    }

    fn description(&self) -> &str {
        "Add a vehicle to an existing customer. Use decode_vin first when the caller \
         provides a VIN, so year, make, and model are accurate."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "customer_id": { "type": "integer" },
                "vin": { "type": "string" },
                "year": { "type": "integer" },
                "make": { "type": "string" },
                "model": { "type": "string" },
                "trim": { "type": "string" },
                "color": { "type": "string" },
                "mileage": { "type": "integer" }
            },
            "required": ["customer_id", "vin", "year", "make", "model"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(customer_id) = required_i64(&args, "customer_id") else {
            return ToolOutcome::fail("missing_argument", "'customer_id' is required");
        };
        let Some(raw_vin) = required_str(&args, "vin") else {
            return ToolOutcome::fail("missing_argument", "'vin' is required");
        };
        let Some(year) = required_i64(&args, "year") else {
            return ToolOutcome::fail("missing_argument", "'year' is required");
        };
        let Some(make) = required_str(&args, "make") else {
            return ToolOutcome::fail("missing_argument", "'make' is required");
        };
        let Some(model) = required_str(&args, "model") else {
            return ToolOutcome::fail("missing_argument", "'model' is required");
        };

        let new = NewVehicle {
            customer_id,
            vin: raw_vin.to_string(),
            year: year as i32,
            make: make.to_string(),
            model: model.to_string(),
            trim: args.get("trim").and_then(|v| v.as_str()).map(String::from),
            color: args.get("color").and_then(|v| v.as_str()).map(String::from),
            mileage: args.get("mileage").and_then(|v| v.as_i64()).unwrap_or(0),
            is_primary: false,
        };

        match VehicleRepo::new(&self.ctx.db).create(&new) {
            Ok(vehicle) => {
                if let Ok(Some(customer)) = CustomerRepo::new(&self.ctx.db).get(customer_id) {
                    self.ctx
                        .store
                        .invalidate_customer_cache(&customer.phone)
                        .await;
                }
                info!(vehicle_id = vehicle.id, customer_id, "vehicle created");
                ToolOutcome::ok_with_message(
                    json!({
                        "vehicle_id": vehicle.id,
                        "vin": vehicle.vin,
                        "vehicle": vehicle.display_name(),
                    }),
                    "Vehicle added",
                )
            }
            Err(DbError::Validation(msg)) => ToolOutcome::fail("validation_error", msg),
            Err(DbError::Constraint(msg)) => ToolOutcome::fail("already_exists", msg),
            Err(DbError::CustomerNotFound { id }) => {
                ToolOutcome::fail("customer_not_found", format!("no customer with id {id}"))
            }
            Err(e) => ToolOutcome::fail("database_error", e.to_string()),
        }
    }
}
