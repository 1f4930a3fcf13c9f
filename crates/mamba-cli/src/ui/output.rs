//! Machine-readable results for `--json`.

use crate::ops::install::Outcome;
use serde_json::{Value, json};

/// The JSON document printed on stdout for a finished run.
pub fn outcome_json(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::NothingToDo { prefix } => json!({
            "success": true,
            "prefix": prefix,
            "message": "All requested packages already installed",
        }),
        Outcome::DryRun(plan) => with_status(plan.to_json(), json!({ "success": true })),
        Outcome::Declined(plan) => with_status(
            plan.to_json(),
            json!({ "success": true, "aborted": true }),
        ),
        Outcome::Completed { plan, summary } => with_status(
            plan.to_json(),
            json!({
                "success": true,
                "linked": summary.linked,
                "unlinked": summary.unlinked,
            }),
        ),
    }
}

fn with_status(mut body: Value, status: Value) -> Value {
    if let (Some(body), Value::Object(status)) = (body.as_object_mut(), status) {
        body.extend(status);
    }
    body
}
