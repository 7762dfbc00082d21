use chrono::NaiveDate;

use crate::domain::customer::CustomerSnapshot;
use crate::domain::ptp::BusinessRules;

/// Renders the business-context block injected as a system message on
/// every turn.
///
/// Regenerated each turn on purpose: `today` moves, and with it the
/// minimum/latest-date lines the model is told to honor.
pub fn render_business_context(
    snapshot: &CustomerSnapshot,
    rules: &BusinessRules,
    today: NaiveDate,
) -> String {
    let minimum = round_currency(rules.minimum_amount(snapshot.total_owed));
    let latest = rules.latest_payment_date(today);

    format!(
        "CONTEXT (do not invent details beyond this):\n\
         Today: {today}\n\
         Customer name: {name}\n\
         Customer ID: {customer_id}\n\
         Loan ID: {loan_id}\n\
         Original loan amount: ${original:.2}\n\
         Total amount owed: ${owed:.2}\n\
         Days overdue: {overdue}\n\
         Previous loan history: {loans} loans, {history}\n\
         \n\
         PTP rules (must follow):\n\
         - Minimum acceptable PTP amount: ${minimum:.2}\n\
         - Latest acceptable payment date: {latest} (within {max_days} days)\n",
        today = today.format("%Y-%m-%d"),
        name = snapshot.name,
        customer_id = snapshot.customer_id.0,
        loan_id = snapshot.loan_id.0,
        original = snapshot.original_amount,
        owed = snapshot.total_owed,
        overdue = snapshot.days_overdue,
        loans = snapshot.previous_loans,
        history = snapshot.payment_history,
        minimum = minimum,
        latest = latest.format("%Y-%m-%d"),
        max_days = rules.max_ptp_days,
    )
}

fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
