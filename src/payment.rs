//! Payment records and the enrollment payment status derived from them.
//!
//! An enrollment's `payment_status` is never written directly: every change
//! to its payments recomputes it inside the same transaction.

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    course,
    error::{Error, Result},
    utils::{now_utc, to_utc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EnrollmentPaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub enrollment_id: i64,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Derive an enrollment's payment status from the course fee and its payment records
pub fn compute_payment_status(fee_cents: i64, payments: &[Payment]) -> EnrollmentPaymentStatus {
    let settled: i64 = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount_cents)
        .sum();
    if fee_cents <= 0 || settled >= fee_cents {
        EnrollmentPaymentStatus::Paid
    } else if settled > 0 {
        EnrollmentPaymentStatus::PartiallyPaid
    } else if payments.iter().any(|p| p.status == PaymentStatus::Refunded) {
        EnrollmentPaymentStatus::Refunded
    } else {
        EnrollmentPaymentStatus::Unpaid
    }
}

const PAYMENT_COLUMNS: &str =
    "SELECT id, enrollment_id, amount_cents, status, paid_at, created_at FROM payment";

pub async fn list_payments(database: &SqlitePool, enrollment_id: i64) -> Result<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(&format!(
        "{PAYMENT_COLUMNS} WHERE enrollment_id = ? ORDER BY id"
    ))
    .bind(enrollment_id)
    .fetch_all(database)
    .await?;
    Ok(payments)
}

async fn recompute_enrollment(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
) -> Result<EnrollmentPaymentStatus> {
    let enrollment = course::get_enrollment(&mut *conn, enrollment_id).await?;
    let fee_cents: i64 = sqlx::query_scalar("SELECT fee_cents FROM course WHERE id = ?")
        .bind(enrollment.course_id)
        .fetch_one(&mut *conn)
        .await?;
    let payments = sqlx::query_as::<_, Payment>(&format!(
        "{PAYMENT_COLUMNS} WHERE enrollment_id = ?"
    ))
    .bind(enrollment_id)
    .fetch_all(&mut *conn)
    .await?;
    let status = compute_payment_status(fee_cents, &payments);
    sqlx::query("UPDATE enrollment SET payment_status = ? WHERE id = ?")
        .bind(status)
        .bind(enrollment_id)
        .execute(&mut *conn)
        .await?;
    Ok(status)
}

pub async fn record_payment(
    database: &SqlitePool,
    enrollment_id: i64,
    amount_cents: i64,
    status: PaymentStatus,
    paid_at: Option<OffsetDateTime>,
) -> Result<(Payment, EnrollmentPaymentStatus)> {
    if amount_cents <= 0 {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    let paid_at = match (status, paid_at) {
        (_, Some(at)) => Some(to_utc(at)),
        (PaymentStatus::Completed, None) => Some(now_utc()),
        _ => None,
    };
    let mut tx = database.begin().await?;
    let payment_id = sqlx::query(
        "INSERT INTO payment (enrollment_id, amount_cents, status, paid_at, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(enrollment_id)
    .bind(amount_cents)
    .bind(status)
    .bind(paid_at)
    .bind(now_utc())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    let enrollment_status = recompute_enrollment(&mut tx, enrollment_id).await?;
    let payment = sqlx::query_as::<_, Payment>(&format!("{PAYMENT_COLUMNS} WHERE id = ?"))
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    info!(
        "recorded payment {} for enrollment {}, now {:?}",
        payment_id, enrollment_id, enrollment_status
    );
    Ok((payment, enrollment_status))
}

pub async fn update_payment_status(
    database: &SqlitePool,
    payment_id: i64,
    status: PaymentStatus,
) -> Result<(Payment, EnrollmentPaymentStatus)> {
    let mut tx = database.begin().await?;
    let updated = sqlx::query(
        "UPDATE payment SET status = ?1, \
         paid_at = CASE WHEN ?1 = 'completed' AND paid_at IS NULL THEN ?2 ELSE paid_at END \
         WHERE id = ?3",
    )
    .bind(status)
    .bind(now_utc())
    .bind(payment_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(Error::NotFound(format!("payment {payment_id}")));
    }
    let payment = sqlx::query_as::<_, Payment>(&format!("{PAYMENT_COLUMNS} WHERE id = ?"))
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
    let enrollment_status = recompute_enrollment(&mut tx, payment.enrollment_id).await?;
    tx.commit().await?;
    info!(
        "payment {} is now {:?}, enrollment {} {:?}",
        payment_id, status, payment.enrollment_id, enrollment_status
    );
    Ok((payment, enrollment_status))
}
