//! Application records and their companions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::Sqlite;
use sqlx::QueryBuilder;

use crate::error::DbError;

/// Identifier of a stored application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ApplicationId(pub i64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an application.
///
/// The store accepts any transition; `can_advance_to` describes the expected
/// forward progression.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Materials generated, waiting for a manual submission
    Pending,
    Submitted,
    #[default]
    Applied,
    Interviewing,
    Offered,
    Accepted,
    Rejected,
    Withdrawn,
    /// The submission attempt did not go through
    Failed,
    /// The automation hit an unexpected error while applying
    Error,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 10] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Submitted,
        ApplicationStatus::Applied,
        ApplicationStatus::Interviewing,
        ApplicationStatus::Offered,
        ApplicationStatus::Accepted,
        ApplicationStatus::Rejected,
        ApplicationStatus::Withdrawn,
        ApplicationStatus::Failed,
        ApplicationStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Interviewing => "interviewing",
            ApplicationStatus::Offered => "offered",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
            ApplicationStatus::Failed => "failed",
            ApplicationStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Accepted | ApplicationStatus::Rejected | ApplicationStatus::Withdrawn
        )
    }

    fn stage(&self) -> u8 {
        match self {
            ApplicationStatus::Pending
            | ApplicationStatus::Submitted
            | ApplicationStatus::Failed
            | ApplicationStatus::Error => 0,
            ApplicationStatus::Applied => 1,
            ApplicationStatus::Interviewing => 2,
            ApplicationStatus::Offered => 3,
            ApplicationStatus::Accepted | ApplicationStatus::Rejected | ApplicationStatus::Withdrawn => 4,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ApplicationStatus::Failed | ApplicationStatus::Error)
    }

    /// Whether moving to `next` follows the usual progression. Staying put is
    /// always fine; terminal states go nowhere else; rejection or withdrawal
    /// can end any open application. A failed submission may be retried from
    /// any state, and only submissions that have not reached the employer's
    /// process yet can fail.
    pub fn can_advance_to(&self, next: ApplicationStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if self.is_failure() {
            return next != ApplicationStatus::Accepted;
        }
        match next {
            ApplicationStatus::Rejected | ApplicationStatus::Withdrawn => true,
            ApplicationStatus::Failed | ApplicationStatus::Error => {
                self.stage() <= ApplicationStatus::Applied.stage()
            }
            ApplicationStatus::Accepted => *self == ApplicationStatus::Offered,
            _ => next.stage() > self.stage(),
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| DbError::validation(format!("unknown application status '{}'", s)))
    }
}

/// A stored application record.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Application {
    pub id: ApplicationId,
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub source: String,
    pub match_score: f64,
    pub status: ApplicationStatus,
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub response_received: bool,
    pub response_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const APPLICATION_COLUMNS: &str = "id, job_id, job_title, company, source, match_score, status, \
     resume_path, cover_letter_path, url, notes, response_received, response_date, created_at, updated_at";

/// A skill the posting asks for, and whether the candidate has it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRequirement {
    pub name: String,
    #[serde(default = "default_skill_category")]
    pub category: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub candidate_has: bool,
    #[serde(default)]
    pub match_score: f64,
}

fn default_skill_category() -> String {
    "technical".to_string()
}

fn default_true() -> bool {
    true
}

impl SkillRequirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: default_skill_category(),
            required: true,
            candidate_has: false,
            match_score: 0.0,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn matched(mut self, match_score: f64) -> Self {
        self.candidate_has = true;
        self.match_score = match_score;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Skill {
    pub id: i64,
    pub application_id: ApplicationId,
    pub skill_name: String,
    pub skill_category: String,
    pub required: bool,
    pub candidate_has: bool,
    pub match_score: f64,
}

/// Input for `add_application`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApplication {
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub source: String,
    pub match_score: f64,
    #[serde(default)]
    pub resume_path: Option<String>,
    #[serde(default)]
    pub cover_letter_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub skills: Vec<SkillRequirement>,
}

impl NewApplication {
    pub fn new(
        job_id: impl Into<String>,
        job_title: impl Into<String>,
        company: impl Into<String>,
        source: impl Into<String>,
        match_score: f64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_title: job_title.into(),
            company: company.into(),
            source: source.into(),
            match_score,
            resume_path: None,
            cover_letter_path: None,
            url: None,
            notes: None,
            skills: Vec::new(),
        }
    }

    pub fn resume_path(mut self, path: impl Into<String>) -> Self {
        self.resume_path = Some(path.into());
        self
    }

    pub fn cover_letter_path(mut self, path: impl Into<String>) -> Self {
        self.cover_letter_path = Some(path.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn skill(mut self, skill: SkillRequirement) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn validate(&self) -> Result<(), DbError> {
        for (field, value) in [
            ("job_id", &self.job_id),
            ("job_title", &self.job_title),
            ("company", &self.company),
            ("source", &self.source),
        ] {
            if value.trim().is_empty() {
                return Err(DbError::validation(format!("{} must not be empty", field)));
            }
        }
        validate_score("match_score", self.match_score)?;
        for skill in &self.skills {
            if skill.name.trim().is_empty() {
                return Err(DbError::validation("skill name must not be empty"));
            }
            validate_score("skill match_score", skill.match_score)?;
        }
        Ok(())
    }
}

fn validate_score(field: &str, score: f64) -> Result<(), DbError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(DbError::validation(format!(
            "{} must be between 0.0 and 1.0, got {}",
            field, score
        )))
    }
}

/// Input for `add_interaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInteraction {
    pub interaction_type: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl NewInteraction {
    pub fn new(interaction_type: impl Into<String>) -> Self {
        Self {
            interaction_type: interaction_type.into(),
            notes: None,
            next_steps: None,
            outcome: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn next_steps(mut self, next_steps: impl Into<String>) -> Self {
        self.next_steps = Some(next_steps.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }
}

/// Something that happened to an application: an email, a call, a status change.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Interaction {
    pub id: i64,
    pub application_id: ApplicationId,
    pub interaction_type: String,
    pub notes: Option<String>,
    pub next_steps: Option<String>,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Conjunctive filter for `get_applications`. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationFilter {
    pub id: Option<ApplicationId>,
    pub job_id: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub min_match_score: Option<f64>,
    pub response_received: Option<bool>,
}

impl ApplicationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: ApplicationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn status(mut self, status: ApplicationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn min_match_score(mut self, score: f64) -> Self {
        self.min_match_score = Some(score);
        self
    }

    pub fn response_received(mut self, received: bool) -> Self {
        self.response_received = Some(received);
        self
    }

    /// Build a filter from loose `field -> value` pairs, as handed over by
    /// automation scripts. Unknown fields and unparsable values are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, DbError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "id" => filter.id = Some(ApplicationId(parse_value(key, value)?)),
                "job_id" => filter.job_id = Some(value.to_string()),
                "company" => filter.company = Some(value.to_string()),
                "source" => filter.source = Some(value.to_string()),
                "status" => filter.status = Some(value.parse()?),
                "min_match_score" => filter.min_match_score = Some(parse_value(key, value)?),
                "response_received" => filter.response_received = Some(parse_value(key, value)?),
                other => {
                    return Err(DbError::validation(format!(
                        "unknown filter field '{}'",
                        other
                    )))
                }
            }
        }
        Ok(filter)
    }

    pub(crate) fn push_conditions(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(id) = self.id {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(job_id) = &self.job_id {
            qb.push(" AND job_id = ").push_bind(job_id.clone());
        }
        if let Some(company) = &self.company {
            qb.push(" AND company = ").push_bind(company.clone());
        }
        if let Some(source) = &self.source {
            qb.push(" AND source = ").push_bind(source.clone());
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(score) = self.min_match_score {
            qb.push(" AND match_score >= ").push_bind(score);
        }
        if let Some(received) = self.response_received {
            qb.push(" AND response_received = ").push_bind(received);
        }
    }
}

fn parse_value<T: FromStr>(field: &str, value: &str) -> Result<T, DbError> {
    value
        .trim()
        .parse()
        .map_err(|_| DbError::validation(format!("invalid value '{}' for filter field '{}'", value, field)))
}

/// Aggregate view over all applications.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationStats {
    pub total_applications: u64,
    pub applications_by_source: std::collections::BTreeMap<String, u64>,
    pub applications_by_status: std::collections::BTreeMap<String, u64>,
    pub response_rate: f64,
    pub average_match_score: f64,
}

/// Response rate of one slice of applications (a source, an hour of the day).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessRate<K> {
    pub key: K,
    pub total: u64,
    pub responses: u64,
    pub success_rate: f64,
}

impl<K> SuccessRate<K> {
    pub(crate) fn new(key: K, total: i64, responses: i64) -> Self {
        let total = total.max(0) as u64;
        let responses = responses.max(0) as u64;
        let success_rate = if total == 0 {
            0.0
        } else {
            responses as f64 / total as f64
        };
        Self {
            key,
            total,
            responses,
            success_rate,
        }
    }
}

/// Advice derived from past applications.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendations {
    /// Sources answering more than 30% of applications, best first
    pub high_success_sources: Vec<SuccessRate<String>>,
    /// Average match score of applications that got a response
    pub best_match_score: Option<f64>,
    /// Hours of the day (UTC) with a response rate above 30%
    pub optimal_application_times: Vec<SuccessRate<u32>>,
    pub improvement_areas: Vec<String>,
}
