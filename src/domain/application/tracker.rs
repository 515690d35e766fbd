//! Application tracker: the only writer of application records.
//!
//! Every operation is one unit of work run through `Database::transaction`,
//! so each is retried on transient failures with a fresh session per attempt.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::Sqlite;
use sqlx::QueryBuilder;

use crate::database::{Database, Session};
use crate::error::DbError;

use super::models::{
    Application, ApplicationFilter, ApplicationId, ApplicationStats, ApplicationStatus,
    Interaction, NewApplication, NewInteraction, Recommendations, Skill, SuccessRate,
    APPLICATION_COLUMNS,
};

const HIGH_SUCCESS_RATE: f64 = 0.3;
const LOW_TRACTION_RATE: f64 = 0.1;
const LOW_TRACTION_MIN_APPLICATIONS: u64 = 3;

#[derive(Clone)]
pub struct ApplicationTracker {
    db: Database,
}

impl ApplicationTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Store a new application with its skills.
    ///
    /// `(job_id, source)` is unique: a second application for the same
    /// posting fails with `DbError::Duplicate` and is not retried.
    pub async fn add_application(&self, new: NewApplication) -> Result<ApplicationId, DbError> {
        new.validate()?;

        let result = self
            .db
            .transaction("add_application", |session| {
                let new = new.clone();
                Box::pin(async move { insert_application(session, &new).await })
            })
            .await;

        match &result {
            Ok(id) => tracing::info!(
                event = "application_created",
                application_id = %id,
                job_id = %new.job_id,
                company = %new.company,
                source = %new.source,
                match_score = new.match_score,
                "Application recorded"
            ),
            Err(DbError::Duplicate(_)) => tracing::warn!(
                job_id = %new.job_id,
                source = %new.source,
                "Application for this posting already exists"
            ),
            Err(e) => tracing::error!(
                job_id = %new.job_id,
                kind = %e.kind(),
                error = %e,
                "Failed to add application"
            ),
        }

        result
    }

    /// Move an application to `status`, appending `notes` to any existing
    /// notes and logging a `status_update` interaction.
    ///
    /// Fails with `DbError::NotFound` when `id` does not exist; nothing is
    /// written in that case.
    pub async fn update_application_status(
        &self,
        id: ApplicationId,
        status: ApplicationStatus,
        notes: Option<&str>,
    ) -> Result<bool, DbError> {
        let notes = notes.map(str::to_string);

        let result = self
            .db
            .transaction("update_application_status", |session| {
                let notes = notes.clone();
                Box::pin(async move {
                    let current = require_application(session, id).await?;
                    if !current.status.can_advance_to(status) {
                        tracing::warn!(
                            application_id = %id,
                            from = %current.status,
                            to = %status,
                            "Status moves against the usual progression"
                        );
                    }

                    let merged_notes = merge_notes(current.notes.as_deref(), notes.as_deref());
                    let now = next_timestamp(current.updated_at);

                    session
                        .execute(
                            "update_application_status",
                            sqlx::query(
                                "UPDATE job_applications SET status = ?, notes = ?, updated_at = ? WHERE id = ?",
                            )
                            .bind(status)
                            .bind(merged_notes)
                            .bind(now)
                            .bind(id),
                        )
                        .await?;

                    let interaction = NewInteraction::new("status_update")
                        .notes(format!("Status updated to: {}", status));
                    insert_interaction(session, id, &interaction, now).await?;

                    Ok(true)
                })
            })
            .await;

        match &result {
            Ok(_) => tracing::info!(
                event = "status_updated",
                application_id = %id,
                status = %status,
                "Application status updated"
            ),
            Err(DbError::NotFound { .. }) => tracing::warn!(
                application_id = %id,
                "Status update for unknown application"
            ),
            Err(e) => tracing::error!(
                application_id = %id,
                kind = %e.kind(),
                error = %e,
                "Failed to update application status"
            ),
        }

        result
    }

    /// All applications matching every set field of `filter`, newest first.
    pub async fn get_applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, DbError> {
        self.db
            .transaction("get_applications", |session| {
                let filter = filter.clone();
                Box::pin(async move {
                    let mut qb = QueryBuilder::<Sqlite>::new(format!(
                        "SELECT {} FROM job_applications WHERE 1 = 1",
                        APPLICATION_COLUMNS
                    ));
                    filter.push_conditions(&mut qb);
                    qb.push(" ORDER BY created_at DESC, id DESC");

                    session
                        .fetch_all_as("get_applications", qb.build_query_as::<Application>())
                        .await
                })
            })
            .await
    }

    pub async fn get_application(&self, id: ApplicationId) -> Result<Application, DbError> {
        self.db
            .transaction("get_application", |session| {
                Box::pin(async move { require_application(session, id).await })
            })
            .await
    }

    /// Mark that the employer answered.
    pub async fn record_response(&self, id: ApplicationId) -> Result<bool, DbError> {
        let result = self
            .db
            .transaction("record_response", |session| {
                Box::pin(async move {
                    let current = require_application(session, id).await?;
                    let now = next_timestamp(current.updated_at);
                    session
                        .execute(
                            "record_response",
                            sqlx::query(
                                "UPDATE job_applications SET response_received = 1, response_date = ?, updated_at = ? WHERE id = ?",
                            )
                            .bind(now)
                            .bind(now)
                            .bind(id),
                        )
                        .await?;
                    Ok(true)
                })
            })
            .await;

        if result.is_ok() {
            tracing::info!(event = "response_received", application_id = %id, "Response recorded");
        }
        result
    }

    pub async fn add_interaction(
        &self,
        id: ApplicationId,
        interaction: NewInteraction,
    ) -> Result<i64, DbError> {
        if interaction.interaction_type.trim().is_empty() {
            return Err(DbError::validation("interaction_type must not be empty"));
        }

        let result = self
            .db
            .transaction("add_interaction", |session| {
                let interaction = interaction.clone();
                Box::pin(async move {
                    require_application(session, id).await?;
                    insert_interaction(session, id, &interaction, Utc::now()).await
                })
            })
            .await;

        if let Ok(interaction_id) = &result {
            tracing::info!(
                event = "interaction_added",
                application_id = %id,
                interaction_id,
                interaction_type = %interaction.interaction_type,
                outcome = interaction.outcome.as_deref().unwrap_or(""),
                "Interaction recorded"
            );
        }
        result
    }

    /// Interactions of one application, oldest first.
    pub async fn get_interactions(&self, id: ApplicationId) -> Result<Vec<Interaction>, DbError> {
        self.db
            .transaction("get_interactions", |session| {
                Box::pin(async move {
                    session
                        .fetch_all_as(
                            "get_interactions",
                            sqlx::query_as::<_, Interaction>(
                                "SELECT id, application_id, interaction_type, notes, next_steps, outcome, created_at \
                                 FROM application_interactions WHERE application_id = ? ORDER BY id ASC",
                            )
                            .bind(id),
                        )
                        .await
                })
            })
            .await
    }

    pub async fn get_skills(&self, id: ApplicationId) -> Result<Vec<Skill>, DbError> {
        self.db
            .transaction("get_skills", |session| {
                Box::pin(async move {
                    session
                        .fetch_all_as(
                            "get_skills",
                            sqlx::query_as::<_, Skill>(
                                "SELECT id, application_id, skill_name, skill_category, required, candidate_has, match_score \
                                 FROM job_skills WHERE application_id = ? ORDER BY id ASC",
                            )
                            .bind(id),
                        )
                        .await
                })
            })
            .await
    }

    /// Totals by source and status, response rate and average match score.
    pub async fn get_application_stats(&self) -> Result<ApplicationStats, DbError> {
        self.db
            .transaction("get_application_stats", |session| {
                Box::pin(async move {
                    let total: i64 = session
                        .fetch_scalar(
                            "count_applications",
                            sqlx::query_scalar("SELECT COUNT(*) FROM job_applications"),
                        )
                        .await?;
                    if total == 0 {
                        return Ok(ApplicationStats::default());
                    }

                    let by_source: Vec<(String, i64)> = session
                        .fetch_all_as(
                            "count_applications_by_source",
                            sqlx::query_as(
                                "SELECT source, COUNT(*) FROM job_applications GROUP BY source",
                            ),
                        )
                        .await?;
                    let by_status: Vec<(String, i64)> = session
                        .fetch_all_as(
                            "count_applications_by_status",
                            sqlx::query_as(
                                "SELECT status, COUNT(*) FROM job_applications GROUP BY status",
                            ),
                        )
                        .await?;
                    let responses: i64 = session
                        .fetch_scalar(
                            "count_responses",
                            sqlx::query_scalar(
                                "SELECT COUNT(*) FROM job_applications WHERE response_received = 1",
                            ),
                        )
                        .await?;
                    let average: Option<f64> = session
                        .fetch_scalar(
                            "average_match_score",
                            sqlx::query_scalar("SELECT AVG(match_score) FROM job_applications"),
                        )
                        .await?;

                    Ok(ApplicationStats {
                        total_applications: total as u64,
                        applications_by_source: by_source
                            .into_iter()
                            .map(|(source, count)| (source, count as u64))
                            .collect(),
                        applications_by_status: by_status
                            .into_iter()
                            .map(|(status, count)| (status, count as u64))
                            .collect(),
                        response_rate: responses as f64 / total as f64,
                        average_match_score: average.unwrap_or(0.0),
                    })
                })
            })
            .await
    }

    /// Which sources, match scores and submission hours have worked so far,
    /// and where the search is stalling.
    pub async fn get_recommendations(&self) -> Result<Recommendations, DbError> {
        self.db
            .transaction("get_recommendations", |session| {
                Box::pin(async move {
                    let by_source: Vec<(String, i64, i64)> = session
                        .fetch_all_as(
                            "responses_by_source",
                            sqlx::query_as(
                                "SELECT source, COUNT(*), SUM(CASE WHEN response_received = 1 THEN 1 ELSE 0 END) \
                                 FROM job_applications GROUP BY source ORDER BY source",
                            ),
                        )
                        .await?;
                    let by_hour: Vec<(Option<i64>, i64, i64)> = session
                        .fetch_all_as(
                            "responses_by_hour",
                            sqlx::query_as(
                                "SELECT CAST(strftime('%H', created_at) AS INTEGER) AS hour, COUNT(*), \
                                 SUM(CASE WHEN response_received = 1 THEN 1 ELSE 0 END) \
                                 FROM job_applications GROUP BY hour ORDER BY hour",
                            ),
                        )
                        .await?;
                    let best_match_score: Option<f64> = session
                        .fetch_scalar(
                            "average_responded_match_score",
                            sqlx::query_scalar(
                                "SELECT AVG(match_score) FROM job_applications WHERE response_received = 1",
                            ),
                        )
                        .await?;
                    let failed_submissions: i64 = session
                        .fetch_scalar(
                            "count_failed_submissions",
                            sqlx::query_scalar(
                                "SELECT COUNT(*) FROM job_applications WHERE status IN (?, ?)",
                            )
                            .bind(ApplicationStatus::Failed)
                            .bind(ApplicationStatus::Error),
                        )
                        .await?;

                    Ok(build_recommendations(
                        by_source,
                        by_hour,
                        best_match_score,
                        failed_submissions,
                    ))
                })
            })
            .await
    }
}

fn build_recommendations(
    by_source: Vec<(String, i64, i64)>,
    by_hour: Vec<(Option<i64>, i64, i64)>,
    best_match_score: Option<f64>,
    failed_submissions: i64,
) -> Recommendations {
    let sources: Vec<SuccessRate<String>> = by_source
        .into_iter()
        .map(|(source, total, responses)| SuccessRate::new(source, total, responses))
        .collect();

    let mut improvement_areas: Vec<String> = sources
        .iter()
        .filter(|s| s.total >= LOW_TRACTION_MIN_APPLICATIONS && s.success_rate < LOW_TRACTION_RATE)
        .map(|s| {
            format!(
                "Only {} of {} applications on {} got a response; consider other sources",
                s.responses, s.total, s.key
            )
        })
        .collect();
    if failed_submissions > 0 {
        improvement_areas.push(format!(
            "{} applications failed to submit and need a manual retry",
            failed_submissions
        ));
    }

    let mut high_success_sources: Vec<SuccessRate<String>> = sources
        .into_iter()
        .filter(|s| s.success_rate > HIGH_SUCCESS_RATE)
        .collect();
    high_success_sources.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));

    let optimal_application_times = by_hour
        .into_iter()
        .filter_map(|(hour, total, responses)| {
            let hour = u32::try_from(hour?).ok()?;
            Some(SuccessRate::new(hour, total, responses))
        })
        .filter(|h| h.success_rate > HIGH_SUCCESS_RATE)
        .collect();

    Recommendations {
        high_success_sources,
        best_match_score,
        optimal_application_times,
        improvement_areas,
    }
}

async fn insert_application(
    session: &mut Session,
    new: &NewApplication,
) -> Result<ApplicationId, DbError> {
    let now = Utc::now();

    let id: ApplicationId = session
        .fetch_scalar(
            "insert_application",
            sqlx::query_scalar(
                "INSERT INTO job_applications \
                 (job_id, job_title, company, source, match_score, status, resume_path, cover_letter_path, \
                  url, notes, response_received, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING id",
            )
            .bind(&new.job_id)
            .bind(&new.job_title)
            .bind(&new.company)
            .bind(&new.source)
            .bind(new.match_score)
            .bind(ApplicationStatus::default())
            .bind(new.resume_path.as_deref())
            .bind(new.cover_letter_path.as_deref())
            .bind(new.url.as_deref())
            .bind(new.notes.as_deref())
            .bind(now)
            .bind(now),
        )
        .await?;

    for skill in &new.skills {
        session
            .execute(
                "insert_skill",
                sqlx::query(
                    "INSERT INTO job_skills \
                     (application_id, skill_name, skill_category, required, candidate_has, match_score) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(id)
                .bind(&skill.name)
                .bind(&skill.category)
                .bind(skill.required)
                .bind(skill.candidate_has)
                .bind(skill.match_score),
            )
            .await?;
    }

    Ok(id)
}

async fn insert_interaction(
    session: &mut Session,
    id: ApplicationId,
    interaction: &NewInteraction,
    at: DateTime<Utc>,
) -> Result<i64, DbError> {
    session
        .fetch_scalar(
            "insert_interaction",
            sqlx::query_scalar(
                "INSERT INTO application_interactions \
                 (application_id, interaction_type, notes, next_steps, outcome, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(id)
            .bind(&interaction.interaction_type)
            .bind(interaction.notes.as_deref())
            .bind(interaction.next_steps.as_deref())
            .bind(interaction.outcome.as_deref())
            .bind(at),
        )
        .await
}

async fn require_application(
    session: &mut Session,
    id: ApplicationId,
) -> Result<Application, DbError> {
    let sql = format!("SELECT {} FROM job_applications WHERE id = ?", APPLICATION_COLUMNS);
    session
        .fetch_optional_as(
            "select_application",
            sqlx::query_as::<_, Application>(&sql).bind(id),
        )
        .await?
        .ok_or_else(|| DbError::not_found("application", id))
}

fn merge_notes(existing: Option<&str>, new: Option<&str>) -> Option<String> {
    match (existing, new) {
        (Some(existing), Some(new)) if !existing.is_empty() => Some(format!("{}\n{}", existing, new)),
        (_, Some(new)) => Some(new.to_string()),
        (existing, None) => existing.map(str::to_string),
    }
}

/// Timestamps of a record only move forward, even if two writes land within
/// the clock's resolution.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous + Duration::microseconds(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_notes() {
        assert_eq!(merge_notes(None, None), None);
        assert_eq!(merge_notes(None, Some("phone screen")), Some("phone screen".to_string()));
        assert_eq!(merge_notes(Some("applied"), None), Some("applied".to_string()));
        assert_eq!(
            merge_notes(Some("applied"), Some("phone screen")),
            Some("applied\nphone screen".to_string())
        );
        assert_eq!(merge_notes(Some(""), Some("phone screen")), Some("phone screen".to_string()));
    }

    #[test]
    fn test_build_recommendations() {
        let recs = build_recommendations(
            vec![
                ("indeed".to_string(), 4, 0),
                ("linkedin".to_string(), 2, 1),
                ("referral".to_string(), 1, 1),
            ],
            vec![(Some(9), 3, 2), (Some(14), 4, 0), (None, 1, 1)],
            Some(0.84),
            2,
        );

        let sources: Vec<&str> = recs.high_success_sources.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(sources, vec!["referral", "linkedin"]);
        assert_eq!(recs.best_match_score, Some(0.84));
        assert_eq!(recs.optimal_application_times.len(), 1);
        assert_eq!(recs.optimal_application_times[0].key, 9);
        assert_eq!(recs.improvement_areas.len(), 2);
        assert!(recs.improvement_areas[0].contains("indeed"));
        assert!(recs.improvement_areas[1].starts_with("2 applications failed"));
    }

    #[test]
    fn test_build_recommendations_empty_store() {
        assert_eq!(
            build_recommendations(Vec::new(), Vec::new(), None, 0),
            Recommendations::default()
        );
    }

    #[test]
    fn test_next_timestamp_is_strictly_later() {
        let future = Utc::now() + Duration::seconds(60);
        assert!(next_timestamp(future) > future);

        let past = Utc::now() - Duration::seconds(60);
        assert!(next_timestamp(past) > past);
    }
}
