//! `create_customer` — register a new caller so booking can proceed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use revline_core::phone;
use revline_db::customers::CustomerRepo;
use revline_db::types::NewCustomer;
use revline_db::DbError;
use revline_llm::{ToolOutcome, VoiceTool};

use super::{required_str, ToolContext};

pub struct CreateCustomerTool {
    ctx: Arc<ToolContext>,
}

impl CreateCustomerTool {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl VoiceTool for CreateCustomerTool {
    fn name(&self) -> &str {
        "create_customer"
    }

    fn description(&self) -> &str {
        "Register a new customer. Use after collecting their name (and ideally email) \
         when lookup_customer found no record."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "phone": { "type": "string" },
                "first_name": { "type": "string" },
                "last_name": { "type": "string" },
                "email": { "type": "string" }
            },
            "required": ["phone", "first_name", "last_name"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(raw_phone) = required_str(&args, "phone") else {
            return ToolOutcome::fail("missing_argument", "'phone' is required");
        };
        let Some(first_name) = required_str(&args, "first_name") else {
            return ToolOutcome::fail("missing_argument", "'first_name' is required");
        };
        let Some(last_name) = required_str(&args, "last_name") else {
            return ToolOutcome::fail("missing_argument", "'last_name' is required");
        };
        let email = args
            .get("email")
            .and_then(|v| v.as_str())
            .map(String::from);

        let new = NewCustomer {
            phone: raw_phone.to_string(),
            email,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            ..Default::default()
        };

        match CustomerRepo::new(&self.ctx.db).create(&new) {
            Ok(customer) => {
                self.ctx
                    .store
                    .invalidate_customer_cache(&customer.phone)
                    .await;
                info!(
                    customer_id = customer.id,
                    phone = %phone::mask(&customer.phone),
                    "customer created"
                );
                ToolOutcome::ok_with_message(
                    json!({
                        "customer_id": customer.id,
                        "name": customer.full_name(),
                        "phone": customer.phone,
                    }),
                    "Customer registered",
                )
            }
            Err(DbError::Validation(msg)) => ToolOutcome::fail("validation_error", msg),
            Err(DbError::Constraint(msg)) => ToolOutcome::fail("already_exists", msg),
            Err(e) => ToolOutcome::fail("database_error", e.to_string()),
        }
    }
}
