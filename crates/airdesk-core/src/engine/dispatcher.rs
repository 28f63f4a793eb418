//! Notification delivery.
//!
//! Pulls undelivered snapshots and fans each one out to two independent
//! channels: the durable popup queue (always attempted) and email
//! (best-effort). The snapshot is marked delivered once both attempts have
//! been made; a mail outage or a broken template never causes resend storms,
//! because the popup is the reliable channel and email failures are only
//! reported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::mail::{
    resolve_mail_config, resolve_recipients, EnvMailConfig, MailTransport,
};
use crate::engine::templates::{default_template, fallback_text, render, render_context};
use crate::error::Result;
use crate::storage::{SettingsStore, SnapshotStore};

/// Outcome of one delivery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Snapshots pulled from the pending queue.
    pub attempted: usize,
    /// Popups newly queued (a crash-retried snapshot keeps its old popup).
    pub popup_queued: usize,
    /// Events delivered to at least one mail recipient.
    pub email_sent: usize,
    /// Events whose email channel was skipped (no transport configured, or
    /// the template failed to render).
    pub email_skipped: usize,
    /// Per-recipient send failures and template errors, for the UI/log.
    pub failures: Vec<String>,
}

/// Renders and delivers pending events.
pub struct NotificationDispatcher<'a> {
    snapshots: &'a SnapshotStore,
    settings: &'a SettingsStore,
    mailer: &'a dyn MailTransport,
    env: EnvMailConfig,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(
        snapshots: &'a SnapshotStore,
        settings: &'a SettingsStore,
        mailer: &'a dyn MailTransport,
        env: EnvMailConfig,
    ) -> Self {
        Self {
            snapshots,
            settings,
            mailer,
            env,
        }
    }

    /// Deliver every pending snapshot, oldest first.
    ///
    /// # Errors
    /// Only storage failures abort the run; events not yet marked delivered
    /// stay pending and are retried at the next check point.
    pub fn deliver_pending(&self, at: DateTime<Utc>) -> Result<DeliveryReport> {
        let mail_settings = self.settings.mail_settings()?;
        let mail_config = resolve_mail_config(mail_settings.as_ref(), &self.env);
        let recipients = resolve_recipients(&self.settings.recipients()?, &self.env);

        let mut report = DeliveryReport::default();
        for snapshot in self.snapshots.pending_since(None, None)? {
            report.attempted += 1;

            let template = self
                .settings
                .template_override(snapshot.kind)?
                .unwrap_or_else(|| default_template(snapshot.kind));
            let ctx = render_context(&snapshot);

            // Email rendering is all-or-nothing per event; the popup always
            // has at least the fallback text.
            let rendered = match (render(&template.subject, &ctx), render(&template.body, &ctx)) {
                (Ok(subject), Ok(body)) => Some((subject, body)),
                (subject, body) => {
                    let error = subject.err().or_else(|| body.err());
                    if let Some(e) = error {
                        warn!(
                            kind = snapshot.kind.as_str(),
                            snapshot_id = snapshot.id,
                            %e,
                            "template failed to render; email skipped for this event"
                        );
                        report
                            .failures
                            .push(format!("{} template: {e}", snapshot.kind.as_str()));
                    }
                    None
                }
            };

            let (title, body) = match &rendered {
                Some((subject, body)) => (subject.clone(), body.clone()),
                None => (snapshot.kind.label().to_string(), fallback_text(&snapshot)),
            };
            if self.snapshots.enqueue_popup(snapshot.id, &title, &body, at)? {
                report.popup_queued += 1;
            }

            match (&mail_config, rendered) {
                (Some(config), Some((subject, body))) if !recipients.is_empty() => {
                    let mut sent_any = false;
                    for recipient in &recipients {
                        match self.mailer.send(config, recipient, &subject, &body) {
                            Ok(()) => sent_any = true,
                            Err(e) => {
                                warn!(recipient = %recipient, %e, "mail delivery failed");
                                report.failures.push(format!("{recipient}: {e}"));
                            }
                        }
                    }
                    if sent_any {
                        report.email_sent += 1;
                    }
                }
                _ => {
                    // No transport, no recipients, or a broken template:
                    // a definitive skip, not a retryable failure.
                    debug!(
                        snapshot_id = snapshot.id,
                        "email skipped (transport unconfigured or template broken)"
                    );
                    report.email_skipped += 1;
                }
            }

            // Both channels have had their attempt: consume the event.
            self.snapshots.mark_delivered(snapshot.id, at)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::condition::ConditionKind;
    use crate::engine::mail::MailConfig;
    use crate::error::MailError;
    use crate::period::PeriodKey;
    use crate::storage::Template;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::cell::RefCell;

    /// Records sends instead of talking SMTP; optionally fails recipients.
    struct RecordingMailer {
        sent: RefCell<Vec<(String, String)>>,
        fail_recipients: Vec<String>,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self {
                sent: RefCell::new(Vec::new()),
                fail_recipients: Vec::new(),
            }
        }

        fn failing(recipients: &[&str]) -> Self {
            Self {
                sent: RefCell::new(Vec::new()),
                fail_recipients: recipients.iter().map(|r| r.to_string()).collect(),
            }
        }
    }

    impl MailTransport for RecordingMailer {
        fn send(
            &self,
            _config: &MailConfig,
            to: &str,
            subject: &str,
            _body: &str,
        ) -> Result<(), MailError> {
            if self.fail_recipients.iter().any(|r| r == to) {
                return Err(MailError::SendFailed {
                    recipient: to.to_string(),
                    reason: "connection timed out".into(),
                });
            }
            self.sent.borrow_mut().push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    fn day(y: i32, m: u32, d: u32) -> PeriodKey {
        PeriodKey::Day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn configured_settings() -> SettingsStore {
        let settings = SettingsStore::open_memory().unwrap();
        settings
            .set_mail_settings(&crate::storage::MailSettings {
                host: "smtp.example".into(),
                port: 587,
                user: "notifier".into(),
                password: "pw".into(),
                sender: "noreply@airport.example".into(),
            })
            .unwrap();
        settings
            .set_recipients(&["ops@airport.example".to_string(), "shift@airport.example".to_string()])
            .unwrap();
        settings
    }

    fn pending_snapshot(snapshots: &SnapshotStore, d: u32) -> i64 {
        let now = Utc::now();
        let (snap, _) = snapshots
            .record_if_absent(
                ConditionKind::DailyReportMissing,
                &day(2024, 3, d),
                None,
                &json!({}),
                now,
            )
            .unwrap();
        snap.id
    }

    #[test]
    fn unconfigured_mail_skips_but_delivers() {
        let snapshots = SnapshotStore::open_memory().unwrap();
        let settings = SettingsStore::open_memory().unwrap();
        let mailer = RecordingMailer::new();
        pending_snapshot(&snapshots, 14);
        pending_snapshot(&snapshots, 15);

        let dispatcher = NotificationDispatcher::new(
            &snapshots,
            &settings,
            &mailer,
            EnvMailConfig::default(),
        );
        let report = dispatcher.deliver_pending(Utc::now()).unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.popup_queued, 2);
        assert_eq!(report.email_skipped, 2);
        assert_eq!(report.email_sent, 0);
        assert!(report.failures.is_empty());
        assert!(mailer.sent.borrow().is_empty());
        assert!(snapshots.pending_since(None, None).unwrap().is_empty());
        assert_eq!(snapshots.unread_popups().unwrap().len(), 2);
    }

    #[test]
    fn sends_to_every_recipient() {
        let snapshots = SnapshotStore::open_memory().unwrap();
        let settings = configured_settings();
        let mailer = RecordingMailer::new();
        pending_snapshot(&snapshots, 15);

        let dispatcher = NotificationDispatcher::new(
            &snapshots,
            &settings,
            &mailer,
            EnvMailConfig::default(),
        );
        let report = dispatcher.deliver_pending(Utc::now()).unwrap();

        assert_eq!(report.email_sent, 1);
        assert_eq!(mailer.sent.borrow().len(), 2);
        assert!(snapshots.pending_since(None, None).unwrap().is_empty());
    }

    #[test]
    fn one_failing_recipient_does_not_block_the_rest() {
        let snapshots = SnapshotStore::open_memory().unwrap();
        let settings = configured_settings();
        let mailer = RecordingMailer::failing(&["ops@airport.example"]);
        pending_snapshot(&snapshots, 15);

        let dispatcher = NotificationDispatcher::new(
            &snapshots,
            &settings,
            &mailer,
            EnvMailConfig::default(),
        );
        let report = dispatcher.deliver_pending(Utc::now()).unwrap();

        assert_eq!(report.email_sent, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(mailer.sent.borrow().len(), 1);
        // Delivery is still marked: email is best-effort.
        assert!(snapshots.pending_since(None, None).unwrap().is_empty());
    }

    #[test]
    fn all_recipients_failing_still_marks_delivered() {
        let snapshots = SnapshotStore::open_memory().unwrap();
        let settings = configured_settings();
        let mailer =
            RecordingMailer::failing(&["ops@airport.example", "shift@airport.example"]);
        pending_snapshot(&snapshots, 15);

        let dispatcher = NotificationDispatcher::new(
            &snapshots,
            &settings,
            &mailer,
            EnvMailConfig::default(),
        );
        let report = dispatcher.deliver_pending(Utc::now()).unwrap();

        assert_eq!(report.email_sent, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(snapshots.pending_since(None, None).unwrap().is_empty());

        // Re-running finds nothing: no resend storm.
        let again = dispatcher.deliver_pending(Utc::now()).unwrap();
        assert_eq!(again.attempted, 0);
    }

    #[test]
    fn broken_template_degrades_to_fallback_popup() {
        let snapshots = SnapshotStore::open_memory().unwrap();
        let settings = configured_settings();
        settings
            .set_template(
                ConditionKind::DailyReportMissing,
                &Template {
                    subject: "Missing {no_such_field}".into(),
                    body: "whatever".into(),
                },
            )
            .unwrap();
        let mailer = RecordingMailer::new();
        pending_snapshot(&snapshots, 15);

        let dispatcher = NotificationDispatcher::new(
            &snapshots,
            &settings,
            &mailer,
            EnvMailConfig::default(),
        );
        let report = dispatcher.deliver_pending(Utc::now()).unwrap();

        assert_eq!(report.email_skipped, 1);
        assert_eq!(report.email_sent, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(mailer.sent.borrow().is_empty());

        let popups = snapshots.unread_popups().unwrap();
        assert_eq!(popups.len(), 1);
        assert_eq!(popups[0].title, "Daily report missing");
        assert!(popups[0].body.contains("2024-03-15"));
    }

    #[test]
    fn env_fallback_recipients_are_used() {
        let snapshots = SnapshotStore::open_memory().unwrap();
        let settings = SettingsStore::open_memory().unwrap();
        let mailer = RecordingMailer::new();
        pending_snapshot(&snapshots, 15);

        let env = EnvMailConfig {
            host: Some("smtp.env.example".into()),
            user: Some("envuser@x.example".into()),
            notify_emails: Some("admin@x.example".into()),
            ..EnvMailConfig::default()
        };
        let dispatcher = NotificationDispatcher::new(&snapshots, &settings, &mailer, env);
        let report = dispatcher.deliver_pending(Utc::now()).unwrap();

        assert_eq!(report.email_sent, 1);
        assert_eq!(mailer.sent.borrow().len(), 1);
        assert_eq!(mailer.sent.borrow()[0].0, "admin@x.example");
    }
}
