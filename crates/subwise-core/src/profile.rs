//! User profile and profile picture handling
//!
//! The profile row is created lazily on first access. The stored
//! `profile_picture` is an object path inside the picture bucket; readers get
//! a short-lived signed URL in its place.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::models::{Profile, ProfileUpdate};
use crate::remote::{fetch_all, insert_record, update_record, BlobStore, RemoteStore};
use crate::review::{ReviewSchedule, ScheduleChange};
use crate::session::{Clock, SystemClock};

/// Pictures are always stored under this name, so a new upload replaces the old one
pub const PICTURE_FILE_NAME: &str = "profile-picture.png";

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// Upload retry schedule: attempt `n` waits `base_delay * n` before retrying
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl From<&StorageConfig> for RetryPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_attempts: config.max_upload_attempts.max(1),
            base_delay: config.retry_base_delay,
        }
    }
}

/// Object path of a user's picture
pub fn picture_path(user_id: &str) -> String {
    format!("{}/{}", user_id, PICTURE_FILE_NAME)
}

/// Reduce a stored picture reference to its object path
///
/// Older rows hold a full (signed or public) URL; everything after
/// `<bucket>/` up to the query string is the path.
pub fn object_path(stored: &str, bucket: &str) -> Result<String> {
    if !stored.contains("://") {
        return Ok(stored.to_string());
    }
    let pattern = Regex::new(&format!(r"{}/([^?]+)", regex::escape(bucket)))?;
    Ok(pattern
        .captures(stored)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| stored.to_string()))
}

fn check_picture(file_name: &str, size: usize, max_bytes: usize) -> Result<()> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::InvalidData(
            "Invalid file type. Please upload a JPG, PNG, or GIF image.".into(),
        ));
    }
    if size > max_bytes {
        return Err(Error::InvalidData(format!(
            "File size too large. Please upload an image smaller than {}MB.",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

pub struct ProfileService {
    store: Arc<dyn RemoteStore>,
    blobs: Arc<dyn BlobStore>,
    owner: String,
    email: Option<String>,
    bucket: String,
    signed_url_ttl_secs: u64,
    max_picture_bytes: usize,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ProfileService {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStore>,
        owner: &str,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            owner: owner.to_string(),
            email: None,
            bucket: storage.bucket.clone(),
            signed_url_ttl_secs: storage.signed_url_ttl_secs,
            max_picture_bytes: storage.max_picture_bytes,
            retry: RetryPolicy::from(storage),
            clock: Arc::new(SystemClock),
        }
    }

    /// Email recorded when the profile is first created
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stored row, without resolving the picture
    async fn stored(&self) -> Result<Option<Profile>> {
        let profiles: Vec<Profile> = fetch_all(self.store.as_ref(), &self.owner).await?;
        Ok(profiles.into_iter().next())
    }

    /// The owner's profile, created on first access
    pub async fn load_or_create(&self) -> Result<Profile> {
        let profile = match self.stored().await? {
            Some(profile) => profile,
            None => {
                info!(user_id = %self.owner, "Creating profile");
                insert_record(
                    self.store.as_ref(),
                    &self.owner,
                    &json!({ "email": self.email }),
                )
                .await?
            }
        };
        Ok(self.resolve_picture(profile).await)
    }

    /// Partial update; `updated_at` is refreshed
    pub async fn update(&self, update: &ProfileUpdate) -> Result<Profile> {
        let current = match self.stored().await? {
            Some(profile) => profile,
            None => self.load_or_create().await?,
        };

        let mut patch = serde_json::to_value(update)?;
        if let Value::Object(map) = &mut patch {
            map.insert(
                "updated_at".into(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        let updated: Profile =
            update_record(self.store.as_ref(), &self.owner, &current.id, &patch).await?;
        Ok(self.resolve_picture(updated).await)
    }

    /// Replace the profile picture and return a signed URL for it
    pub async fn upload_picture(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        check_picture(file_name, bytes.len(), self.max_picture_bytes)?;

        let path = picture_path(&self.owner);
        if let Err(e) = self.blobs.remove(&path).await {
            warn!(path = %path, error = %e, "Failed to remove previous profile picture");
        }

        self.upload_with_retry(&path, bytes).await?;

        self.update(&ProfileUpdate {
            profile_picture: Some(path.clone()),
            ..Default::default()
        })
        .await?;

        self.signed_url(&path)
            .await?
            .ok_or_else(|| Error::Storage("Failed to get signed URL for uploaded file".into()))
    }

    async fn upload_with_retry(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.blobs.upload(path, bytes.clone(), "image/png").await {
                Ok(()) => {
                    debug!(path, attempt, "Profile picture uploaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "Upload attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(Error::UploadFailed {
            attempts,
            message: last_error,
        })
    }

    /// Signed URL for an object, or `None` when it does not exist
    async fn signed_url(&self, path: &str) -> Result<Option<String>> {
        if !self.blobs.exists(path).await? {
            return Ok(None);
        }
        self.blobs
            .signed_url(path, self.signed_url_ttl_secs)
            .await
            .map(Some)
    }

    /// Swap the stored picture path for a signed URL; on failure keep the path
    async fn resolve_picture(&self, mut profile: Profile) -> Profile {
        let Some(stored) = profile.profile_picture.clone() else {
            return profile;
        };
        let resolved = match object_path(&stored, &self.bucket) {
            Ok(path) => self.signed_url(&path).await,
            Err(e) => Err(e),
        };
        match resolved {
            Ok(Some(url)) => profile.profile_picture = Some(url),
            Ok(None) => debug!(path = %stored, "Profile picture file not found"),
            Err(e) => warn!(path = %stored, error = %e, "Failed to resolve profile picture"),
        }
        profile
    }

    // Review schedule

    async fn save_schedule(&self, schedule: ReviewSchedule) -> Result<Profile> {
        self.update(&ProfileUpdate {
            review: Some(schedule),
            ..Default::default()
        })
        .await
    }

    /// Turn review reminders on, counting now as the last review
    pub async fn enable_review_schedule(&self) -> Result<Profile> {
        let profile = self.load_or_create().await?;
        let schedule = profile.review.enable(self.clock.now_utc());
        info!(user_id = %self.owner, frequency = %schedule.frequency, "Review schedule enabled");
        self.save_schedule(schedule).await
    }

    /// Change the frequency or slot; the schedule becomes enabled
    pub async fn set_review_schedule(&self, change: ScheduleChange) -> Result<Profile> {
        let profile = self.load_or_create().await?;
        let schedule = profile.review.update(change, self.clock.now_utc())?;
        self.save_schedule(schedule).await
    }

    pub async fn disable_review_schedule(&self) -> Result<Profile> {
        let profile = self.load_or_create().await?;
        self.save_schedule(profile.review.disable()).await
    }

    /// Record a finished review and schedule the next one
    pub async fn mark_reviewed(&self) -> Result<Profile> {
        let profile = self.load_or_create().await?;
        let schedule = profile.review.mark_reviewed(self.clock.now_utc());
        self.save_schedule(schedule).await
    }

    /// Whether a review is due now
    pub async fn review_due(&self) -> Result<bool> {
        let profile = self.load_or_create().await?;
        Ok(profile.review.is_due(self.clock.now_utc()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::remote::MemoryStore;
    use crate::review::{ReviewFrequency, ReviewSlot};
    use crate::session::FixedClock;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn service(store: &MemoryStore) -> ProfileService {
        let config = Config::default();
        let shared = Arc::new(store.clone());
        ProfileService::new(shared.clone(), shared, "u1", &config.storage)
            .with_email("u1@example.com")
    }

    #[test]
    fn test_object_path() {
        let url = "https://abc.example.co/storage/v1/object/sign/profile-pictures/u1/profile-picture.png?token=xyz";
        assert_eq!(
            object_path(url, "profile-pictures").unwrap(),
            "u1/profile-picture.png"
        );
        assert_eq!(
            object_path("u1/profile-picture.png", "profile-pictures").unwrap(),
            "u1/profile-picture.png"
        );
    }

    #[test]
    fn test_check_picture() {
        let max = 5 * 1024 * 1024;
        assert!(check_picture("me.JPG", 10, max).is_ok());
        assert!(check_picture("me.gif", max, max).is_ok());
        assert!(check_picture("me.bmp", 10, max).is_err());
        assert!(check_picture("noext", 10, max).is_err());
        assert!(check_picture("me.png", max + 1, max).is_err());
    }

    #[test]
    fn test_retry_delays_are_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_load_or_create_is_lazy_and_stable() {
        let store = MemoryStore::new();
        let profiles = service(&store);

        let first = profiles.load_or_create().await.unwrap();
        assert_eq!(first.contact.email.as_deref(), Some("u1@example.com"));
        let second = profiles.load_or_create().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.snapshot().unwrap().profiles.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_retries_then_succeeds() {
        let store = MemoryStore::new();
        store.fail_next_uploads(2).unwrap();
        let profiles = service(&store);

        let started = tokio::time::Instant::now();
        let url = profiles
            .upload_picture("avatar.jpeg", vec![0u8; 64])
            .await
            .unwrap();

        assert_eq!(store.upload_attempts().unwrap(), 3);
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(url.contains("u1/profile-picture.png"));
        assert_eq!(
            store
                .blob_content_type("u1/profile-picture.png")
                .unwrap()
                .as_deref(),
            Some("image/png")
        );

        let profile = profiles.load_or_create().await.unwrap();
        assert!(profile
            .profile_picture
            .unwrap()
            .contains("object/sign/profile-pictures/u1/profile-picture.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_gives_up_after_max_attempts() {
        let store = MemoryStore::new();
        store.fail_next_uploads(10).unwrap();
        let profiles = service(&store);

        let result = profiles.upload_picture("avatar.png", vec![1, 2, 3]).await;
        assert!(matches!(
            result,
            Err(Error::UploadFailed { attempts: 3, .. })
        ));
        assert_eq!(store.upload_attempts().unwrap(), 3);
        assert!(store.snapshot().unwrap().profiles.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_picture_is_not_uploaded() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        assert!(matches!(
            profiles.upload_picture("notes.txt", vec![1]).await,
            Err(Error::InvalidData(_))
        ));
        assert_eq!(store.upload_attempts().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_review_schedule_round_trip() {
        let store = MemoryStore::new();
        // Friday 2024-03-01 10:00, read as UTC
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let profiles = service(&store).with_clock(Arc::new(FixedClock(now)));

        let profile = profiles.enable_review_schedule().await.unwrap();
        assert!(profile.review.enabled);
        assert_eq!(profile.review.frequency, ReviewFrequency::Monthly);
        assert_eq!(profile.review.last_reviewed, Some(now.and_utc()));
        assert_eq!(
            profile.review.next_review,
            Some(at(2024, 4, 1, 10).and_utc())
        );
        assert!(!profiles.review_due().await.unwrap());

        // Stored under the profile's own columns
        let row = &store.snapshot().unwrap().profiles[0];
        assert_eq!(row["schedule_review_enabled"], true);
        assert_eq!(row["schedule_review_frequency"], "monthly");
        assert!(row["next_review_date"].is_string());

        let profile = profiles
            .set_review_schedule(ScheduleChange {
                frequency: Some(ReviewFrequency::Weekly),
                slot: Some(ReviewSlot {
                    day_of_week: 1,
                    week_of_month: 1,
                    time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                }),
            })
            .await
            .unwrap();
        // A week after the last review is Friday the 8th; the next Monday is the 11th
        assert_eq!(
            profile.review.next_review,
            Some(at(2024, 3, 11, 9).and_utc())
        );

        let disabled = profiles.disable_review_schedule().await.unwrap();
        assert!(!disabled.review.enabled);
        assert!(disabled.review.last_reviewed.is_none());
        assert!(disabled.review.next_review.is_none());
        assert_eq!(disabled.review.frequency, ReviewFrequency::Weekly);
        let row = &store.snapshot().unwrap().profiles[0];
        assert!(row["next_review_date"].is_null());
    }

    #[tokio::test]
    async fn test_review_due_after_a_period() {
        let store = MemoryStore::new();
        let start = at(2024, 1, 10, 8);
        service(&store)
            .with_clock(Arc::new(FixedClock(start)))
            .set_review_schedule(ScheduleChange {
                frequency: Some(ReviewFrequency::Quarterly),
                ..Default::default()
            })
            .await
            .unwrap();

        let later = service(&store).with_clock(Arc::new(FixedClock(at(2024, 4, 10, 8))));
        assert!(later.review_due().await.unwrap());

        let reviewed = later.mark_reviewed().await.unwrap();
        assert_eq!(
            reviewed.review.next_review,
            Some(at(2024, 7, 10, 8).and_utc())
        );
        assert!(!later.review_due().await.unwrap());
    }
}
