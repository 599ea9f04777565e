//! Review and escalation repository.
//!
//! Each review submission is its own row; resolving one drives the reviewed
//! task forward in the same transaction (approve completes it, reject sends
//! it to rework and bumps the counter, escalate opens an escalation and
//! leaves the task in review). Escalation resolution returns the task to
//! progress only once no unresolved escalation remains.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use uuid::Uuid;

use super::domain::{
    Escalation, EscalationResolution, LatestReview, Review, ReviewOutcome, ReviewResolution,
    ReviewStatus, Task, TaskStatus,
};
use super::error::{StoreError, StoreResult};
use super::repo_task::{get_task, get_task_by_rowid, write_task_status};
use super::repository::ReviewRepository;
use super::{format_ts, lookup_order_id, parse_ts, parse_ts_opt, run_blocking};

const SELECT_REVIEW: &str = "SELECT id, public_id, task_id, status, reviewer, comment,
            submitted_at, reviewed_at
     FROM reviews";

const SELECT_ESCALATION: &str = "SELECT id, public_id, task_id, review_id, reason, resolution,
            created_at, resolved_at
     FROM escalations";

pub(crate) fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    let status: String = row.get("status")?;
    let submitted_at: String = row.get("submitted_at")?;
    let reviewed_at: Option<String> = row.get("reviewed_at")?;
    Ok(Review {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        task_id: row.get("task_id")?,
        status: ReviewStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        reviewer: row.get("reviewer")?,
        comment: row.get("comment")?,
        submitted_at: parse_ts(&submitted_at)?,
        reviewed_at: parse_ts_opt(reviewed_at)?,
    })
}

pub(crate) fn escalation_from_row(row: &Row<'_>) -> rusqlite::Result<Escalation> {
    let created_at: String = row.get("created_at")?;
    let resolved_at: Option<String> = row.get("resolved_at")?;
    Ok(Escalation {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        task_id: row.get("task_id")?,
        review_id: row.get("review_id")?,
        reason: row.get("reason")?,
        resolution: row.get("resolution")?,
        created_at: parse_ts(&created_at)?,
        resolved_at: parse_ts_opt(resolved_at)?,
    })
}

fn get_review(conn: &Connection, public_id: &str) -> StoreResult<Review> {
    conn.query_row(
        &format!("{SELECT_REVIEW} WHERE public_id = ?1"),
        params![public_id],
        review_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::ReviewNotFound(public_id.to_string()))
}

fn get_review_by_rowid(conn: &Connection, id: i64) -> StoreResult<Review> {
    let review = conn.query_row(
        &format!("{SELECT_REVIEW} WHERE id = ?1"),
        params![id],
        review_from_row,
    )?;
    Ok(review)
}

fn get_escalation(conn: &Connection, public_id: &str) -> StoreResult<Escalation> {
    conn.query_row(
        &format!("{SELECT_ESCALATION} WHERE public_id = ?1"),
        params![public_id],
        escalation_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::EscalationNotFound(public_id.to_string()))
}

fn settle_review(
    conn: &Connection,
    review: &Review,
    status: ReviewStatus,
    comment: Option<&str>,
) -> StoreResult<Review> {
    conn.execute(
        "UPDATE reviews SET status = ?1, comment = COALESCE(?2, comment), reviewed_at = ?3
         WHERE id = ?4",
        params![
            status.as_str(),
            comment,
            format_ts(OffsetDateTime::now_utc()),
            review.id,
        ],
    )?;
    get_review_by_rowid(conn, review.id)
}

#[derive(Clone)]
pub struct SqliteReviewRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReviewRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReviewRepository for SqliteReviewRepository {
    async fn submit(
        &self,
        task_id: &str,
        reviewer: Option<String>,
        actor: &str,
    ) -> StoreResult<(Review, Task)> {
        let task_public = task_id.to_string();
        let actor = actor.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let task = get_task(&tx, &task_public)?;
            let now = format_ts(OffsetDateTime::now_utc());
            tx.execute(
                "INSERT INTO reviews (public_id, task_id, status, reviewer, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::now_v7().to_string(),
                    task.id,
                    ReviewStatus::Pending.as_str(),
                    reviewer,
                    now,
                ],
            )?;
            let review = get_review_by_rowid(&tx, tx.last_insert_rowid())?;
            let task = write_task_status(&tx, &task, TaskStatus::InReview, &actor, None)?;
            tx.commit()?;
            Ok((review, task))
        })
        .await
    }

    async fn start(&self, review_id: &str, reviewer: &str) -> StoreResult<Review> {
        let public_id = review_id.to_string();
        let reviewer = reviewer.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let review = get_review(&tx, &public_id)?;
            tx.execute(
                "UPDATE reviews SET status = ?1, reviewer = ?2 WHERE id = ?3",
                params![ReviewStatus::InReview.as_str(), reviewer, review.id],
            )?;
            let updated = get_review_by_rowid(&tx, review.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn resolve(
        &self,
        review_id: &str,
        outcome: ReviewOutcome,
        comment: Option<String>,
        actor: &str,
    ) -> StoreResult<ReviewResolution> {
        let public_id = review_id.to_string();
        let actor = actor.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let review = get_review(&tx, &public_id)?;
            let task = get_task_by_rowid(&tx, review.task_id)?;

            let resolution = match outcome {
                ReviewOutcome::Approve => {
                    let review =
                        settle_review(&tx, &review, ReviewStatus::Approved, comment.as_deref())?;
                    let task =
                        write_task_status(&tx, &task, TaskStatus::Completed, &actor, None)?;
                    ReviewResolution {
                        review,
                        task,
                        escalation: None,
                    }
                }
                ReviewOutcome::Reject => {
                    let review =
                        settle_review(&tx, &review, ReviewStatus::Rejected, comment.as_deref())?;
                    tx.execute(
                        "UPDATE tasks SET reject_count = reject_count + 1 WHERE id = ?1",
                        params![task.id],
                    )?;
                    let task = get_task_by_rowid(&tx, task.id)?;
                    let task = write_task_status(
                        &tx,
                        &task,
                        TaskStatus::Rework,
                        &actor,
                        comment.as_deref(),
                    )?;
                    ReviewResolution {
                        review,
                        task,
                        escalation: None,
                    }
                }
                ReviewOutcome::Escalate { reason } => {
                    let review =
                        settle_review(&tx, &review, ReviewStatus::Escalated, comment.as_deref())?;
                    tx.execute(
                        "INSERT INTO escalations (public_id, task_id, review_id, reason, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            Uuid::now_v7().to_string(),
                            task.id,
                            review.id,
                            reason,
                            format_ts(OffsetDateTime::now_utc()),
                        ],
                    )?;
                    let escalation = tx.query_row(
                        &format!("{SELECT_ESCALATION} WHERE id = ?1"),
                        params![tx.last_insert_rowid()],
                        escalation_from_row,
                    )?;
                    // Task stays in review until the escalation is settled.
                    ReviewResolution {
                        review,
                        task,
                        escalation: Some(escalation),
                    }
                }
            };

            tx.commit()?;
            Ok(resolution)
        })
        .await
    }

    async fn get(&self, review_id: &str) -> StoreResult<Review> {
        let public_id = review_id.to_string();
        run_blocking(&self.conn, move |conn| get_review(conn, &public_id)).await
    }

    async fn list_for_task(&self, task_id: &str) -> StoreResult<Vec<Review>> {
        let task_public = task_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let task = get_task(conn, &task_public)?;
            let mut stmt =
                conn.prepare(&format!("{SELECT_REVIEW} WHERE task_id = ?1 ORDER BY id ASC"))?;
            let rows = stmt
                .query_map(params![task.id], review_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn latest_for_order(&self, order_id: &str) -> StoreResult<Vec<LatestReview>> {
        let order_public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let order_id = lookup_order_id(conn, &order_public)?
                .ok_or_else(|| StoreError::OrderNotFound(order_public.clone()))?;
            let mut stmt = conn.prepare(
                "SELECT t.public_id AS task_public_id,
                        r.id, r.public_id, r.task_id, r.status, r.reviewer, r.comment,
                        r.submitted_at, r.reviewed_at
                 FROM reviews r
                 JOIN tasks t ON t.id = r.task_id
                 WHERE t.order_id = ?1
                   AND r.id = (SELECT MAX(r2.id) FROM reviews r2 WHERE r2.task_id = r.task_id)
                 ORDER BY t.number ASC",
            )?;
            let rows = stmt
                .query_map(params![order_id], |row| {
                    Ok(LatestReview {
                        task_id: row.get("task_public_id")?,
                        review: review_from_row(row)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn resolve_escalation(
        &self,
        escalation_id: &str,
        resolution: &str,
        actor: &str,
    ) -> StoreResult<EscalationResolution> {
        let public_id = escalation_id.to_string();
        let resolution = resolution.to_string();
        let actor = actor.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let escalation = get_escalation(&tx, &public_id)?;
            if escalation.is_resolved() {
                let task = get_task_by_rowid(&tx, escalation.task_id)?;
                tx.commit()?;
                return Ok(EscalationResolution {
                    escalation,
                    task,
                    reopened: false,
                });
            }

            tx.execute(
                "UPDATE escalations SET resolution = ?1, resolved_at = ?2 WHERE id = ?3",
                params![
                    resolution,
                    format_ts(OffsetDateTime::now_utc()),
                    escalation.id,
                ],
            )?;
            let escalation = tx.query_row(
                &format!("{SELECT_ESCALATION} WHERE id = ?1"),
                params![escalation.id],
                escalation_from_row,
            )?;

            let open_remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM escalations WHERE task_id = ?1 AND resolved_at IS NULL",
                params![escalation.task_id],
                |row| row.get(0),
            )?;
            let task = get_task_by_rowid(&tx, escalation.task_id)?;
            let (task, reopened) = if open_remaining == 0 && task.status == TaskStatus::InReview {
                let task = write_task_status(
                    &tx,
                    &task,
                    TaskStatus::InProgress,
                    &actor,
                    Some(&resolution),
                )?;
                (task, true)
            } else {
                (task, false)
            };

            tx.commit()?;
            Ok(EscalationResolution {
                escalation,
                task,
                reopened,
            })
        })
        .await
    }

    async fn escalations_for_task(&self, task_id: &str) -> StoreResult<Vec<Escalation>> {
        let task_public = task_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let task = get_task(conn, &task_public)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_ESCALATION} WHERE task_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt
                .query_map(params![task.id], escalation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn open_escalations_for_order(&self, order_id: &str) -> StoreResult<Vec<Escalation>> {
        let order_public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let order_id = lookup_order_id(conn, &order_public)?
                .ok_or_else(|| StoreError::OrderNotFound(order_public.clone()))?;
            let mut stmt = conn.prepare(
                "SELECT e.id, e.public_id, e.task_id, e.review_id, e.reason, e.resolution,
                        e.created_at, e.resolved_at
                 FROM escalations e
                 JOIN tasks t ON t.id = e.task_id
                 WHERE t.order_id = ?1 AND e.resolved_at IS NULL
                 ORDER BY e.id ASC",
            )?;
            let rows = stmt
                .query_map(params![order_id], escalation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
