//! In-process collaborators for tests and local runs

use anyhow::{bail, Result};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::{CatalogSource, ProfileSource};
use crate::types::{EngagementRecord, InterestProfile, Item, ItemId, UserId};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Catalog held in memory. Can simulate outages and latency.
#[derive(Default)]
pub struct InMemoryCatalog {
    courses: RwLock<Vec<Item>>,
    activities: RwLock<BTreeMap<ItemId, Vec<Item>>>,
    enrollments: RwLock<Vec<EngagementRecord>>,
    activity_engagement: RwLock<BTreeMap<ItemId, Vec<EngagementRecord>>>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(self, course: Item) -> Self {
        self.add_course(course);
        self
    }

    pub fn with_activity(self, activity: Item) -> Self {
        let course_id = activity.parent_course.unwrap_or_default();
        write(&self.activities).entry(course_id).or_default().push(activity);
        self
    }

    pub fn with_enrollment(self, user_id: UserId, course_id: ItemId) -> Self {
        self.enroll(user_id, course_id);
        self
    }

    pub fn with_engagement(self, course_id: ItemId, record: EngagementRecord) -> Self {
        write(&self.activity_engagement)
            .entry(course_id)
            .or_default()
            .push(record);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_course(&self, course: Item) {
        let mut courses = write(&self.courses);
        courses.retain(|existing| existing.id != course.id);
        courses.push(course);
        courses.sort_by_key(|c| c.id);
    }

    pub fn enroll(&self, user_id: UserId, course_id: ItemId) {
        write(&self.enrollments).push(EngagementRecord::enrolled(user_id, course_id));
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of collaborator calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("catalog unavailable");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn list_courses(&self) -> Result<Vec<Item>> {
        self.respond().await?;
        Ok(read(&self.courses).clone())
    }

    async fn enrollments(&self) -> Result<Vec<EngagementRecord>> {
        self.respond().await?;
        Ok(read(&self.enrollments).clone())
    }

    async fn course_activities(&self, course_id: ItemId) -> Result<Vec<Item>> {
        self.respond().await?;
        Ok(read(&self.activities)
            .get(&course_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn activity_engagement(&self, course_id: ItemId) -> Result<Vec<EngagementRecord>> {
        self.respond().await?;
        Ok(read(&self.activity_engagement)
            .get(&course_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Interest profiles held in memory. Can simulate outages and latency.
#[derive(Default)]
pub struct InMemoryProfiles {
    profiles: DashMap<UserId, BTreeSet<String>>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interests<I, S>(self, user_id: UserId, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_interests(user_id, interests);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_interests<I, S>(&self, user_id: UserId, interests: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles
            .insert(user_id, interests.into_iter().map(Into::into).collect());
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ProfileSource for InMemoryProfiles {
    async fn interests(&self, user_id: UserId) -> Result<InterestProfile> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("profile store unavailable");
        }

        let interests = self
            .profiles
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(InterestProfile { user_id, interests })
    }
}
