//! Notification templates and rendering.
//!
//! Each condition kind has a built-in default template; admins can override
//! subject and body per kind. Placeholders are written `{name}` and filled
//! from the event's render context. A placeholder with no value is a
//! [`TemplateError`]: the email for that event is skipped, the popup falls
//! back to [`fallback_text`].

use serde_json::Value;

use crate::engine::condition::ConditionKind;
use crate::error::TemplateError;
use crate::storage::{Snapshot, Template};

/// Built-in template for a condition kind.
pub fn default_template(kind: ConditionKind) -> Template {
    match kind {
        ConditionKind::UserCreated => Template {
            subject: "New account pending approval".into(),
            body: "A new account was created and is pending approval:\n\n\
                   Full name: {fullname}\nNickname: {nickname}\n\n\
                   Please log in and approve the user in Manage users."
                .into(),
        },
        ConditionKind::UserDeleted => Template {
            subject: "User account deleted".into(),
            body: "The account of {fullname} ({nickname}) was deleted on {period}.".into(),
        },
        ConditionKind::DailyReportCreated => Template {
            subject: "Daily report exported".into(),
            body: "The daily sales report for {period} was exported: \
                   {entry_count} entries, {total} EUR."
                .into(),
        },
        ConditionKind::DailyReportMissing => Template {
            subject: "Daily report missing".into(),
            body: "No daily sales report was exported for {period} by 08:00.".into(),
        },
        ConditionKind::MonthlyReportCreated => Template {
            subject: "Monthly report exported".into(),
            body: "The monthly sales report for {period} was exported: \
                   {entry_count} entries, {total} EUR."
                .into(),
        },
        ConditionKind::MonthlyReportMissing => Template {
            subject: "Monthly report missing".into(),
            body: "No monthly sales report was exported for {period}.".into(),
        },
        ConditionKind::RewardComputed => Template {
            subject: "Variable reward finalized".into(),
            body: "Variable reward for user {user} for {period}: {final} EUR \
                   (computed {computed} EUR)."
                .into(),
        },
    }
}

/// Format a cent amount as a decimal euro string.
pub fn format_euro_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

/// Build the substitution context for a snapshot: its payload fields as
/// strings, `*_cents` amounts additionally formatted as euros, plus the
/// standard `period` and `user` fields.
pub fn render_context(snapshot: &Snapshot) -> Value {
    let mut ctx = serde_json::Map::new();
    ctx.insert("period".into(), Value::String(snapshot.period.to_string()));
    if let Some(subject) = snapshot.subject_id {
        ctx.insert("user".into(), Value::String(subject.to_string()));
    }
    if let Value::Object(fields) = &snapshot.payload {
        for (key, value) in fields {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            if let (Some(stem), Value::Number(n)) = (key.strip_suffix("_cents"), value) {
                if let Some(cents) = n.as_i64() {
                    ctx.insert(stem.to_string(), Value::String(format_euro_cents(cents)));
                }
            }
            ctx.insert(key.clone(), Value::String(text));
        }
    }
    Value::Object(ctx)
}

/// Substitute `{name}` placeholders in `template` from `ctx`.
///
/// A doubled brace (`{{`, `}}`) escapes to a literal brace.
///
/// # Errors
/// Returns an error for a placeholder with no matching context field.
pub fn render(template: &str, ctx: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            // Unterminated placeholder: keep it literal.
                            out.push('{');
                            out.push_str(&name);
                            return Ok(out);
                        }
                    }
                }
                match ctx.get(name.as_str()).and_then(Value::as_str) {
                    Some(value) => out.push_str(value),
                    None => return Err(TemplateError::MissingPlaceholder { name }),
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Plain rendering used for the popup when the template is broken.
pub fn fallback_text(snapshot: &Snapshot) -> String {
    format!("{} ({})", snapshot.kind.label(), snapshot.period)
}
