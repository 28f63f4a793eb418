//! Integration tests for reward finalization, overrides and notification.

use std::sync::{Arc, Mutex};

use airdesk_core::{
    Database, Engine, MailConfig, MailError, MailTransport, PeriodKey, RewardManager,
    SettingsStore, SnapshotStore, REPORT_TZ,
};
use chrono::{DateTime, Utc};

#[derive(Clone, Default)]
struct RecordingMailer {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl MailTransport for RecordingMailer {
    fn send(
        &self,
        _config: &MailConfig,
        to: &str,
        subject: &str,
        _body: &str,
    ) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap()
}

#[test]
fn two_user_export_scenario() {
    let engine = Engine::with_parts(
        Database::open_memory().unwrap(),
        SnapshotStore::open_memory().unwrap(),
        SettingsStore::open_memory().unwrap(),
        Box::new(RecordingMailer::default()),
    );
    let period = PeriodKey::parse("2024-06").unwrap();
    let at = utc("2024-07-01T06:00:00+00:00");

    // User A: fees 2400.00 EUR at the default 5% -> computed 120.00, no
    // override. User B: fees 1900.00 -> computed 95.00, overridden to 150.00.
    engine.db().set_fee_total(1, &period, 240_000, at).unwrap();
    engine.db().set_fee_total(2, &period, 190_000, at).unwrap();
    engine.db().set_override(2, &period, 15_000, at).unwrap();

    let manager = RewardManager::new(engine.db(), engine.snapshots(), engine.settings());
    let a = manager.finalize_reward(1, &period, at).unwrap();
    let b = manager.finalize_reward(2, &period, at).unwrap();

    assert_eq!(a.computed_cents, 12_000);
    assert_eq!(a.override_cents, None);
    assert_eq!(a.final_cents, 12_000);
    assert_eq!(b.computed_cents, 9_500);
    assert_eq!(b.override_cents, Some(15_000));
    assert_eq!(b.final_cents, 15_000);

    // The full-list export returns exactly these two finalized amounts.
    let exported = manager.export_rewards(&period).unwrap();
    assert_eq!(exported.len(), 2);
    assert_eq!(exported[0], a);
    assert_eq!(exported[1], b);

    // Finalizing again returns identical snapshots.
    assert_eq!(manager.finalize_reward(1, &period, at).unwrap(), a);
    assert_eq!(manager.finalize_reward(2, &period, at).unwrap(), b);
}

#[test]
fn finalized_rewards_are_notified_like_any_event() {
    let mailer = RecordingMailer::default();
    let engine = Engine::with_parts(
        Database::open_memory().unwrap(),
        SnapshotStore::open_memory().unwrap(),
        SettingsStore::open_memory().unwrap(),
        Box::new(mailer.clone()),
    );
    engine
        .settings()
        .set_mail_settings(&airdesk_core::MailSettings {
            host: "smtp.airport.example".into(),
            port: 587,
            user: "notifier".into(),
            password: "pw".into(),
            sender: "noreply@airport.example".into(),
        })
        .unwrap();
    engine
        .settings()
        .set_recipients(&["ops@airport.example".to_string()])
        .unwrap();

    let period = PeriodKey::parse("2024-06").unwrap();
    let at = utc("2024-07-02T10:00:00+00:00");
    engine.db().set_fee_total(7, &period, 300_000, at).unwrap();

    let manager = RewardManager::new(engine.db(), engine.snapshots(), engine.settings());
    let finalized = manager.finalize_reward(7, &period, at).unwrap();
    assert_eq!(finalized.final_cents, 15_000);

    // The reward export flow triggers a check point, which delivers the
    // REWARD_COMPUTED snapshot recorded above.
    let summary = engine
        .check_and_notify(utc("2024-07-02T10:00:05+00:00"), REPORT_TZ)
        .unwrap();
    let reward_popup = summary
        .unread
        .iter()
        .find(|p| p.title == "Variable reward finalized")
        .unwrap();
    assert!(reward_popup.body.contains("150.00 EUR"));
    assert!(reward_popup.body.contains("2024-06"));

    let sent = mailer.sent.lock().unwrap();
    assert!(sent
        .iter()
        .any(|(_, subject)| subject == "Variable reward finalized"));

    // A second check point does not re-deliver the reward event.
    drop(sent);
    let again = engine
        .check_and_notify(utc("2024-07-02T10:01:00+00:00"), REPORT_TZ)
        .unwrap();
    assert_eq!(again.new_events, 0);
}
