//! Database layer tests: failure ledger, conditional transitions under
//! concurrency, cron audit rows and locks.

mod common;

use chrono::{Duration, Utc};
use common::fixtures::*;
use futures::future::join_all;
use reconciler::database::{
    CancelOutcome, EntityKind, PaymentStatus, ReservationStatus, RUN_COMPLETED, RUN_FAILED,
    RUN_RUNNING,
};
use reconciler::Database;
use tempfile::TempDir;

#[tokio::test]
async fn test_ledger_increment_stops_at_threshold() {
    let db = TestDatabase::new().await;
    let (id, _) = db.pending_reservation(minutes_ago(10), Some(tickets::T1)).await;

    for expected in 1..=5 {
        let state = db
            .db
            .record_failure(EntityKind::Reserva, id, "pendiente_pago", "HTTP 503", 5, base_now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.failures, expected);
        assert_eq!(state.frozen, expected == 5);
    }

    let sixth = db
        .db
        .record_failure(EntityKind::Reserva, id, "pendiente_pago", "HTTP 503", 5, base_now())
        .await
        .unwrap();
    assert!(sixth.is_none(), "Frozen entities are not incremented");
}

#[tokio::test]
async fn test_ledger_ignores_entities_in_another_status() {
    let db = TestDatabase::new().await;
    let (id, payment) = db.pending_reservation(minutes_ago(10), Some(tickets::T1)).await;
    assert!(db
        .db
        .confirm_reservation_payment(id, payment.unwrap(), None, base_now())
        .await
        .unwrap());

    let state = db
        .db
        .record_failure(EntityKind::Reserva, id, "pendiente_pago", "late error", 5, base_now())
        .await
        .unwrap();
    assert!(state.is_none());
    assert_eq!(db.db.get_reservation(id).await.unwrap().unwrap().fallos_reporte, 0);
}

#[tokio::test]
async fn test_concurrent_failures_never_lose_an_increment() {
    let db = TestDatabase::on_disk().await;
    let (id, _) = db.pending_mensualidad(minutes_ago(10), tickets::MONTHLY).await;

    let attempts = (0..8).map(|i| {
        let database = db.db.clone();
        async move {
            database
                .record_failure(
                    EntityKind::Mensualidad,
                    id,
                    "pendiente_pago",
                    &format!("attempt {}", i),
                    5,
                    Utc::now(),
                )
                .await
                .unwrap()
        }
    });
    let results = join_all(attempts).await;

    let applied = results.iter().filter(|state| state.is_some()).count();
    assert_eq!(applied, 5);
    let mensualidad = db.db.get_mensualidad(id).await.unwrap().unwrap();
    assert_eq!(mensualidad.fallos_reporte, 5);
    assert!(mensualidad.congelada_at.is_some());
}

#[tokio::test]
async fn test_confirm_and_cancel_race_has_one_winner() {
    let db = TestDatabase::on_disk().await;
    let now = base_now();

    for _ in 0..10 {
        let (id, payment) = db.pending_reservation(minutes_ago(45), Some(tickets::T1)).await;
        let payment = payment.unwrap();

        let (confirmed, canceled) = tokio::join!(
            db.db.confirm_reservation_payment(id, payment, None, now),
            db.db.cancel_unpaid_reservation(id, "Reserva sin pago", 5, now),
        );
        let confirmed = confirmed.unwrap();
        let canceled = canceled.unwrap() != CancelOutcome::NotPending;
        assert!(confirmed ^ canceled, "Exactly one transition must win");

        let reservation = db.db.get_reservation(id).await.unwrap().unwrap();
        let payment = db.db.get_payment(payment).await.unwrap().unwrap();
        if confirmed {
            assert_eq!(reservation.estado, ReservationStatus::Confirmed);
            assert_eq!(payment.estado, PaymentStatus::Confirmed);
            assert!(reservation.deleted_at.is_none());
        } else {
            assert_eq!(reservation.estado, ReservationStatus::Canceled);
            assert_eq!(payment.estado, PaymentStatus::Expired);
        }
    }
}

#[tokio::test]
async fn test_soft_deleted_reservation_is_not_reprocessed() {
    let db = TestDatabase::new().await;
    let (id, payment) = db.pending_reservation(minutes_ago(45), Some(tickets::T1)).await;
    sqlx::query("UPDATE reservas SET deleted_at = ? WHERE id = ?")
        .bind(base_now())
        .bind(id)
        .execute(db.db.pool())
        .await
        .unwrap();

    assert!(db
        .db
        .find_stale_pending_reservations(base_now(), 10)
        .await
        .unwrap()
        .is_empty());
    assert!(db
        .db
        .find_pending_reservation_payments(5, 10)
        .await
        .unwrap()
        .is_empty());
    assert!(!db
        .db
        .confirm_reservation_payment(id, payment.unwrap(), None, base_now())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_reset_ledger_unfreezes() {
    let db = TestDatabase::new().await;
    let (id, _) = db.pending_mensualidad(minutes_ago(10), tickets::MONTHLY).await;
    db.set_ledger("mensualidades", id, 5, Some(base_now())).await;

    assert!(db
        .db
        .reset_ledger(EntityKind::Mensualidad, id, base_now())
        .await
        .unwrap());
    let mensualidad = db.db.get_mensualidad(id).await.unwrap().unwrap();
    assert_eq!(mensualidad.fallos_reporte, 0);
    assert!(mensualidad.congelada_at.is_none());
    assert!(mensualidad.ultimo_error_reporte.is_none());

    assert!(!db
        .db
        .reset_ledger(EntityKind::Mensualidad, 9_999, base_now())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_reported_entities_leave_the_unreported_set() {
    let db = TestDatabase::new().await;
    let (early, _) = db.pending_reservation(minutes_ago(90), Some(tickets::T1)).await;
    let (late, _) = db.pending_reservation(minutes_ago(90), Some(tickets::T2)).await;
    db.set_ledger("reservas", early, 5, Some(minutes_ago(60))).await;
    db.set_ledger("reservas", late, 5, Some(minutes_ago(5))).await;

    let all = db.db.frozen_unreported(EntityKind::Reserva, 5).await.unwrap();
    let ids: Vec<i64> = all.iter().map(|entity| entity.id).collect();
    assert_eq!(ids, vec![early, late], "Oldest freeze first");

    db.db
        .record_report_sent(base_now(), &all[..1], &[])
        .await
        .unwrap();
    let left = db.db.frozen_unreported(EntityKind::Reserva, 5).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, late);

    // A reset followed by a new freeze makes the entity reportable again
    db.db
        .reset_ledger(EntityKind::Reserva, early, base_now())
        .await
        .unwrap();
    for _ in 0..5 {
        db.db
            .record_failure(
                EntityKind::Reserva,
                early,
                "pendiente_pago",
                "Gateway returned HTTP 503 for ticket TCK-0001",
                5,
                base_now(),
            )
            .await
            .unwrap();
    }
    let again = db.db.frozen_unreported(EntityKind::Reserva, 5).await.unwrap();
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_cron_run_lifecycle() {
    let db = TestDatabase::new().await;
    let id = db.db.start_run("cron:confirmar-pagos", base_now()).await.unwrap();

    let run = db.db.get_run(&id).await.unwrap().unwrap();
    assert_eq!(run.estado, RUN_RUNNING);
    assert!(run.finished_at.is_none());

    db.db
        .finish_run(
            &id,
            RUN_COMPLETED,
            Some("1 examined"),
            None,
            base_now() + Duration::seconds(3),
        )
        .await
        .unwrap();

    let run = db.db.get_run(&id).await.unwrap().unwrap();
    assert_eq!(run.estado, RUN_COMPLETED);
    assert_eq!(run.resumen.as_deref(), Some("1 examined"));
    assert_eq!(run.finished_at, Some(base_now() + Duration::seconds(3)));
}

#[tokio::test]
async fn test_lock_is_exclusive_until_expiry() {
    let db = TestDatabase::new().await;
    let now = base_now();
    let expires = now + Duration::minutes(10);

    assert!(db.db.try_acquire_lock("cron:x", "a", now, expires).await.unwrap());
    assert!(!db.db.try_acquire_lock("cron:x", "b", now, expires).await.unwrap());
    assert!(!db.db.release_lock("cron:x", "b").await.unwrap(), "Only the owner releases");

    let after_expiry = expires + Duration::seconds(1);
    assert!(db
        .db
        .try_acquire_lock("cron:x", "b", after_expiry, after_expiry + Duration::minutes(10))
        .await
        .unwrap());
    assert!(db.db.release_lock("cron:x", "b").await.unwrap());
}

#[tokio::test]
async fn test_stuck_runs_are_failed_on_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reservas.db");
    let path = path.to_str().unwrap();

    let stuck_id = {
        let db = Database::new(path).await.unwrap();
        let id = db
            .start_run("cron:reservas-sin-pago", Utc::now() - Duration::hours(3))
            .await
            .unwrap();
        db.pool().close().await;
        id
    };

    let db = Database::new(path).await.unwrap();
    let run = db.get_run(&stuck_id).await.unwrap().unwrap();
    assert_eq!(run.estado, RUN_FAILED);
    assert!(run.error_message.unwrap().contains("stuck"));
}
