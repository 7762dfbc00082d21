use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::customer::CustomerSnapshot;

/// Process-wide negotiation constraints, loaded once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusinessRules {
    /// Minimum acceptable promise amount as a fraction of `total_owed`.
    pub min_ptp_percent: f64,
    /// Latest acceptable payment date, in days from today.
    pub max_ptp_days: u32,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self { min_ptp_percent: 0.25, max_ptp_days: 90 }
    }
}

impl BusinessRules {
    pub fn minimum_amount(&self, total_owed: f64) -> f64 {
        total_owed * self.min_ptp_percent
    }

    pub fn latest_payment_date(&self, today: NaiveDate) -> NaiveDate {
        today.checked_add_days(Days::new(u64::from(self.max_ptp_days))).unwrap_or(NaiveDate::MAX)
    }
}

/// Raw, untrusted structured output of the extraction model call.
///
/// `amount` and `payment_date` are kept as loose JSON values on purpose:
/// the model may emit numbers, numeric strings, or garbage, and the
/// validator is the only place that decides what is usable. Discarded
/// after validation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExtractionCandidate {
    #[serde(default)]
    pub has_ptp: bool,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub payment_date: Option<Value>,
    #[serde(default)]
    pub notes: Option<Value>,
}

/// Canonical Promise-to-Pay record. At most one is ever written per
/// session; once written it is never overwritten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PtpRecord {
    pub amount: f64,
    pub payment_date: NaiveDate,
    pub notes: String,
}

/// Negative validation outcome. Not an error: the conversation keeps
/// negotiating and no partial record is produced.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PtpRejection {
    #[error("amount and payment_date are both required")]
    MissingField,
    #[error("amount is not a usable number: {0}")]
    UnparsableAmount(String),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),
    #[error("payment_date is not a YYYY-MM-DD calendar date: {0}")]
    UnparsableDate(String),
    #[error("payment_date {date} is outside today..today+{max_days} days")]
    DateOutOfWindow { date: NaiveDate, max_days: u32 },
    #[error("amount {amount:.2} is below the minimum {minimum:.2}")]
    BelowMinimum { amount: f64, minimum: f64 },
}

/// Validates an extraction candidate against the business rules and
/// normalizes it into a canonical record.
///
/// Checks run in order and short-circuit on the first failure. Pure and
/// deterministic for a fixed `today`; callers inject the current date so
/// tests can pin it.
pub fn validate_candidate(
    snapshot: &CustomerSnapshot,
    rules: &BusinessRules,
    candidate: &ExtractionCandidate,
    today: NaiveDate,
) -> Result<PtpRecord, PtpRejection> {
    let amount_value = present(&candidate.amount).ok_or(PtpRejection::MissingField)?;
    let date_value = present(&candidate.payment_date).ok_or(PtpRejection::MissingField)?;

    let amount = parse_amount(amount_value)?;
    if amount <= 0.0 {
        return Err(PtpRejection::NonPositiveAmount(amount));
    }

    let payment_date = parse_date(date_value)?;
    let latest = rules.latest_payment_date(today);
    if payment_date < today || payment_date > latest {
        return Err(PtpRejection::DateOutOfWindow {
            date: payment_date,
            max_days: rules.max_ptp_days,
        });
    }

    let minimum = rules.minimum_amount(snapshot.total_owed);
    // Small tolerance absorbs float rounding right at the boundary.
    if amount + 1e-9 < minimum {
        return Err(PtpRejection::BelowMinimum { amount, minimum });
    }

    Ok(PtpRecord {
        amount: round_currency(amount),
        payment_date,
        notes: coerce_notes(&candidate.notes),
    })
}

fn present(value: &Option<Value>) -> Option<&Value> {
    match value {
        Some(Value::Null) | None => None,
        Some(inner) => Some(inner),
    }
}

fn parse_amount(value: &Value) -> Result<f64, PtpRejection> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(amount) if amount.is_finite() => Ok(amount),
        _ => Err(PtpRejection::UnparsableAmount(value.to_string())),
    }
}

fn parse_date(value: &Value) -> Result<NaiveDate, PtpRejection> {
    let Value::String(text) = value else {
        return Err(PtpRejection::UnparsableDate(value.to_string()));
    };

    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| PtpRejection::UnparsableDate(text.clone()))
}

fn coerce_notes(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
