use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoanId(pub String);

/// Immutable view of one delinquent account, fetched once per session.
///
/// Amounts are plain currency values in the account's billing currency.
/// `total_owed` includes accrued fees and is the base for the minimum
/// acceptable promise amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub customer_id: CustomerId,
    pub name: String,
    pub loan_id: LoanId,
    pub original_amount: f64,
    pub total_owed: f64,
    pub days_overdue: u32,
    pub previous_loans: u32,
    pub payment_history: String,
}

impl CustomerSnapshot {
    /// Demo fixture used whenever no real customer-data collaborator is
    /// reachable. Field-level lookups fall back to these values too, so a
    /// partially failing collaborator never fails a turn.
    pub fn demo() -> Self {
        Self {
            customer_id: CustomerId("CUST001".to_string()),
            name: "Sarah Omondi".to_string(),
            loan_id: LoanId("LOAN12345".to_string()),
            original_amount: 500.00,
            total_owed: 562.50,
            days_overdue: 45,
            previous_loans: 3,
            payment_history: "2 on-time, 1 late".to_string(),
        }
    }
}
