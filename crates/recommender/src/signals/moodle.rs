//! Moodle web service client
//!
//! Every call is a form POST to `{base}/webservice/rest/server.php` with the
//! service token and `moodlewsrestformat=json`. Moodle reports failures as a
//! 200 response carrying an `exception`/`errorcode` object, which is turned
//! into an error here.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

use super::CatalogSource;
use crate::config::CollaboratorConfig;
use crate::types::{EngagementKind, EngagementRecord, Item, ItemId, UserId, SITE_COURSE_ID};

const REST_PATH: &str = "/webservice/rest/server.php";

#[derive(Debug, Deserialize)]
struct MoodleCourse {
    id: ItemId,
    fullname: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    categoryname: Option<String>,
    #[serde(default)]
    timecreated: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MoodleUser {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct MoodleSection {
    #[serde(default)]
    modules: Vec<MoodleModule>,
}

#[derive(Debug, Deserialize)]
struct MoodleModule {
    id: ItemId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    modname: String,
}

#[derive(Debug, Default, Deserialize)]
struct MoodleCompletion {
    #[serde(default)]
    statuses: Vec<MoodleActivityStatus>,
}

#[derive(Debug, Deserialize)]
struct MoodleActivityStatus {
    cmid: ItemId,
    #[serde(default)]
    state: i64,
    #[serde(default)]
    viewed: bool,
    #[serde(default)]
    timecompleted: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MoodleCourseTags {
    id: ItemId,
    #[serde(default)]
    tags: Vec<MoodleTag>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MoodleTag {
    Name(String),
    Object { name: String },
}

impl MoodleTag {
    fn into_name(self) -> String {
        match self {
            MoodleTag::Name(name) | MoodleTag::Object { name } => name,
        }
    }
}

fn timestamp(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds
        .filter(|s| *s > 0)
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
}

impl MoodleCourse {
    fn into_item(self, tags: BTreeSet<String>) -> Item {
        Item {
            tags,
            created_at: timestamp(self.timecreated),
            ..Item::course(self.id, self.fullname)
                .with_description(self.summary)
                .with_category(self.categoryname.unwrap_or_default())
        }
    }
}

impl MoodleModule {
    fn into_item(self, course_id: ItemId) -> Item {
        Item::activity(self.id, course_id, self.name)
            .with_description(self.description.unwrap_or_default())
            .with_category(self.modname)
    }
}

/// Completed states are 1 (complete) and 2 (complete, passed)
fn status_records(user_id: UserId, completion: MoodleCompletion) -> Vec<EngagementRecord> {
    completion
        .statuses
        .into_iter()
        .filter(|status| status.cmid != 0)
        .filter_map(|status| {
            let kind = match status.state {
                1 | 2 => EngagementKind::Completed,
                _ if status.viewed => EngagementKind::Viewed,
                _ => return None,
            };
            Some(EngagementRecord {
                user_id,
                item_id: status.cmid,
                kind,
                timestamp: timestamp(status.timecompleted),
            })
        })
        .collect()
}

fn check_moodle_error(value: &serde_json::Value) -> Result<()> {
    if let Some(object) = value.as_object() {
        if object.contains_key("exception") || object.contains_key("errorcode") {
            let message = object
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown Moodle error");
            let code = object
                .get("errorcode")
                .and_then(|c| c.as_str())
                .unwrap_or("-");
            bail!("Moodle error {}: {}", code, message);
        }
    }
    Ok(())
}

/// Ids of real courses, the site front page excluded
fn course_ids(courses: &[MoodleCourse]) -> Vec<ItemId> {
    courses
        .iter()
        .map(|course| course.id)
        .filter(|id| *id != SITE_COURSE_ID)
        .collect()
}

/// Catalog collaborator backed by Moodle web services
pub struct MoodleClient {
    http_client: reqwest::Client,
    endpoint: String,
    token: String,
    max_concurrent_requests: usize,
}

impl MoodleClient {
    pub fn new(config: &CollaboratorConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: format!("{}{}", config.moodle_url.trim_end_matches('/'), REST_PATH),
            token: config.moodle_token.clone(),
            max_concurrent_requests: config.max_concurrent_requests.max(1),
        })
    }

    #[instrument(skip(self, params), fields(endpoint = %self.endpoint))]
    async fn call<T: DeserializeOwned>(
        &self,
        wsfunction: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut form: Vec<(&str, String)> = vec![
            ("wstoken", self.token.clone()),
            ("wsfunction", wsfunction.to_string()),
            ("moodlewsrestformat", "json".to_string()),
        ];
        form.extend(params.iter().cloned());

        let response = self
            .http_client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to Moodle", wsfunction))?;

        if !response.status().is_success() {
            bail!("Moodle returned error status {} for {}", response.status(), wsfunction);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Moodle {} response", wsfunction))?;
        check_moodle_error(&body)?;

        serde_json::from_value(body)
            .with_context(|| format!("Unexpected Moodle {} response shape", wsfunction))
    }

    /// Verify token and connectivity
    pub async fn test_connection(&self) -> Result<String> {
        let info: serde_json::Value = self.call("core_webservice_get_site_info", &[]).await?;
        Ok(info
            .get("sitename")
            .and_then(|name| name.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn site_courses(&self) -> Result<Vec<MoodleCourse>> {
        self.call("core_course_get_courses", &[]).await
    }

    /// Tags of every course in one call. Missing plugin means no tags.
    async fn course_tags(&self) -> HashMap<ItemId, BTreeSet<String>> {
        match self
            .call::<Vec<MoodleCourseTags>>("local_coursetags_get_course_tags", &[])
            .await
        {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| {
                    let tags = entry.tags.into_iter().map(MoodleTag::into_name).collect();
                    (entry.id, tags)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Course tags unavailable, continuing without tags");
                HashMap::new()
            }
        }
    }

    async fn enrolled_users(&self, course_id: ItemId) -> Result<Vec<UserId>> {
        let users: Vec<MoodleUser> = self
            .call(
                "core_enrol_get_enrolled_users",
                &[("courseid", course_id.to_string())],
            )
            .await?;
        Ok(users.into_iter().map(|user| user.id).collect())
    }
}

#[async_trait::async_trait]
impl CatalogSource for MoodleClient {
    async fn list_courses(&self) -> Result<Vec<Item>> {
        let courses = self.site_courses().await?;
        let mut tags = self.course_tags().await;

        let items: Vec<Item> = courses
            .into_iter()
            .filter(|course| course.id != SITE_COURSE_ID)
            .map(|course| {
                let course_tags = tags.remove(&course.id).unwrap_or_default();
                course.into_item(course_tags)
            })
            .collect();

        info!(courses = items.len(), "Fetched course catalog");
        Ok(items)
    }

    async fn enrollments(&self) -> Result<Vec<EngagementRecord>> {
        let courses = self.site_courses().await?;

        let per_course: Vec<Vec<EngagementRecord>> = stream::iter(course_ids(&courses))
            .map(move |course_id| async move {
                let users = self
                    .enrolled_users(course_id)
                    .await
                    .with_context(|| format!("Failed to list users of course {}", course_id))?;
                Ok::<_, anyhow::Error>(
                    users
                        .into_iter()
                        .map(|user_id| EngagementRecord::enrolled(user_id, course_id))
                        .collect::<Vec<_>>(),
                )
            })
            .buffer_unordered(self.max_concurrent_requests)
            .try_collect()
            .await?;

        let records: Vec<EngagementRecord> = per_course.into_iter().flatten().collect();
        debug!(records = records.len(), "Fetched enrollments");
        Ok(records)
    }

    async fn user_courses(&self, user_id: UserId) -> Result<Vec<ItemId>> {
        let courses: Vec<MoodleCourse> = self
            .call("core_enrol_get_users_courses", &[("userid", user_id.to_string())])
            .await?;
        Ok(courses.into_iter().map(|course| course.id).collect())
    }

    async fn enrollment_counts(&self) -> Result<HashMap<ItemId, u64>> {
        let courses = self.site_courses().await?;

        let counts = stream::iter(course_ids(&courses))
            .map(move |course_id| async move {
                (course_id, self.enrolled_users(course_id).await)
            })
            .buffer_unordered(self.max_concurrent_requests)
            .filter_map(|(course_id, users)| async move {
                match users {
                    Ok(users) => Some((course_id, users.len() as u64)),
                    Err(e) => {
                        warn!(course_id, error = %e, "Enrollment count unavailable");
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(counts)
    }

    async fn course_activities(&self, course_id: ItemId) -> Result<Vec<Item>> {
        let sections: Vec<MoodleSection> = self
            .call("core_course_get_contents", &[("courseid", course_id.to_string())])
            .await?;

        Ok(sections
            .into_iter()
            .flat_map(|section| section.modules)
            .map(|module| module.into_item(course_id))
            .collect())
    }

    async fn activity_engagement(&self, course_id: ItemId) -> Result<Vec<EngagementRecord>> {
        let users = self.enrolled_users(course_id).await?;

        let per_user: Vec<Vec<EngagementRecord>> = stream::iter(users)
            .map(move |user_id| async move {
                let completion: Result<MoodleCompletion> = self
                    .call(
                        "core_completion_get_activities_completion_status",
                        &[
                            ("userid", user_id.to_string()),
                            ("courseid", course_id.to_string()),
                        ],
                    )
                    .await;

                match completion {
                    Ok(completion) => status_records(user_id, completion),
                    Err(e) => {
                        warn!(user_id, course_id, error = %e, "Skipping user without completion data");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_requests)
            .collect()
            .await;

        Ok(per_user.into_iter().flatten().collect())
    }
}
