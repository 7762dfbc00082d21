use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use recoveries_core::{CustomerId, CustomerSnapshot, LoanId};

use crate::gateway::ToolGateway;

/// Customer-data collaborator. Infallible by contract: lookups substitute
/// demo-safe defaults for anything missing or unreachable, so a flaky
/// data source never fails a turn.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn snapshot(&self, session_id: &str) -> CustomerSnapshot;
}

/// Fixture-backed directory for demos and tests.
#[derive(Default)]
pub struct StaticCustomerDirectory;

#[async_trait]
impl CustomerDirectory for StaticCustomerDirectory {
    async fn snapshot(&self, _session_id: &str) -> CustomerSnapshot {
        CustomerSnapshot::demo()
    }
}

/// Directory backed by the tool gateway's `get_customer_info` and
/// `get_loan_details` tools, with field-level fallback to the demo
/// fixture.
pub struct GatewayCustomerDirectory {
    gateway: ToolGateway,
}

impl GatewayCustomerDirectory {
    pub fn new(gateway: ToolGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl CustomerDirectory for GatewayCustomerDirectory {
    async fn snapshot(&self, session_id: &str) -> CustomerSnapshot {
        let defaults = CustomerSnapshot::demo();

        let customer = self
            .gateway
            .call_tool("get_customer_info", json!({ "customer_id": defaults.customer_id.0 }))
            .await
            .unwrap_or_else(|error| {
                debug!(
                    event_name = "agent.customers.customer_lookup_failed",
                    session_id,
                    error = %error,
                    "customer lookup failed, using demo defaults"
                );
                Value::Null
            });
        let loan = self
            .gateway
            .call_tool("get_loan_details", json!({ "loan_id": defaults.loan_id.0 }))
            .await
            .unwrap_or_else(|error| {
                debug!(
                    event_name = "agent.customers.loan_lookup_failed",
                    session_id,
                    error = %error,
                    "loan lookup failed, using demo defaults"
                );
                Value::Null
            });

        CustomerSnapshot {
            customer_id: CustomerId(
                field_str(&customer, "customer_id").unwrap_or(defaults.customer_id.0),
            ),
            name: field_str(&customer, "name").unwrap_or(defaults.name),
            loan_id: LoanId(field_str(&loan, "loan_id").unwrap_or(defaults.loan_id.0)),
            original_amount: field_f64(&loan, "original_amount")
                .unwrap_or(defaults.original_amount),
            total_owed: field_f64(&loan, "current_balance").unwrap_or(defaults.total_owed),
            days_overdue: field_u32(&loan, "days_overdue").unwrap_or(defaults.days_overdue),
            previous_loans: field_u32(&customer, "previous_loans")
                .unwrap_or(defaults.previous_loans),
            payment_history: field_str(&customer, "payment_history")
                .unwrap_or(defaults.payment_history),
        }
    }
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(str::to_string)
}

fn field_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key)?.as_f64()
}

fn field_u32(value: &Value, key: &str) -> Option<u32> {
    u32::try_from(value.get(key)?.as_u64()?).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{field_f64, field_str, field_u32};

    #[test]
    fn field_helpers_tolerate_wrong_shapes() {
        let payload = json!({"name": 42, "current_balance": "oops", "days_overdue": -3});

        assert!(field_str(&payload, "name").is_none());
        assert!(field_f64(&payload, "current_balance").is_none());
        assert!(field_u32(&payload, "days_overdue").is_none());
        assert!(field_str(&payload, "missing").is_none());
    }

    #[test]
    fn field_helpers_extract_expected_types() {
        let payload = json!({"name": "Sarah", "current_balance": 562.5, "previous_loans": 3});

        assert_eq!(field_str(&payload, "name").as_deref(), Some("Sarah"));
        assert_eq!(field_f64(&payload, "current_balance"), Some(562.5));
        assert_eq!(field_u32(&payload, "previous_loans"), Some(3));
    }
}
