//! User directory: profiles and course access grants.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::{CourseId, UserId};

use crate::error::ServiceError;

/// Contact details and granted courses of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub enrolled_courses: BTreeSet<CourseId>,
}

impl UserProfile {
    /// Creates a profile without contact details or courses.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            phone: None,
            enrolled_courses: BTreeSet::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}

/// Directory of users and the courses they may access.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Adds `course_id` to the user's enrolled courses.
    ///
    /// Set-union semantics: granting an already granted course is a no-op.
    async fn grant_access(&self, user_id: &UserId, course_id: &CourseId)
    -> Result<(), ServiceError>;

    /// Loads a user's profile.
    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryDirectoryState {
    users: HashMap<UserId, UserProfile>,
    /// When set, grants for courses outside this set are rejected.
    known_courses: Option<HashSet<CourseId>>,
    grant_calls: usize,
    fail_next_grants: u32,
    grant_delay: Option<Duration>,
}

/// In-memory user directory for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    state: Arc<RwLock<InMemoryDirectoryState>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn add_user(&self, profile: UserProfile) {
        self.write().users.insert(profile.id.clone(), profile);
    }

    /// Restricts grants to registered courses.
    pub fn register_course(&self, course_id: impl Into<CourseId>) {
        self.write()
            .known_courses
            .get_or_insert_with(HashSet::new)
            .insert(course_id.into());
    }

    /// Makes the next `count` grant calls fail as unavailable.
    pub fn fail_next_grants(&self, count: u32) {
        self.write().fail_next_grants = count;
    }

    /// Delays every grant call, for timeout tests.
    pub fn set_grant_delay(&self, delay: Option<Duration>) {
        self.write().grant_delay = delay;
    }

    /// Number of grant calls received, failed ones included.
    pub fn grant_count(&self) -> usize {
        self.read().grant_calls
    }

    /// Courses granted to a user, in sorted order.
    pub fn enrolled_courses(&self, user_id: &UserId) -> Vec<CourseId> {
        self.read()
            .users
            .get(user_id)
            .map(|user| user.enrolled_courses.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryDirectoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryDirectoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn grant_access(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError> {
        let delay = self.read().grant_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write();
        state.grant_calls += 1;

        if state.fail_next_grants > 0 {
            state.fail_next_grants -= 1;
            return Err(ServiceError::Unavailable(
                "user directory unreachable".to_string(),
            ));
        }

        let course_known = state
            .known_courses
            .as_ref()
            .is_none_or(|known| known.contains(course_id));
        if !course_known {
            return Err(ServiceError::NotFound(format!("course {course_id}")));
        }

        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
        user.enrolled_courses.insert(course_id.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<UserProfile, ServiceError> {
        self.read()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with_user() -> InMemoryUserDirectory {
        let directory = InMemoryUserDirectory::new();
        directory.add_user(UserProfile::new("u1", "Ada").with_email("ada@example.com"));
        directory
    }

    #[tokio::test]
    async fn test_grant_is_set_union() {
        let directory = directory_with_user();
        let user = UserId::from("u1");
        let course = CourseId::from("c1");

        directory.grant_access(&user, &course).await.unwrap();
        directory.grant_access(&user, &course).await.unwrap();

        assert_eq!(directory.enrolled_courses(&user), vec![course]);
        assert_eq!(directory.grant_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let directory = InMemoryUserDirectory::new();
        let err = directory
            .grant_access(&"ghost".into(), &"c1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_course_is_not_found_when_catalog_registered() {
        let directory = directory_with_user();
        directory.register_course("c1");
        let err = directory
            .grant_access(&"u1".into(), &"c2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fail_next_grants() {
        let directory = directory_with_user();
        directory.fail_next_grants(1);

        let first = directory.grant_access(&"u1".into(), &"c1".into()).await;
        assert!(matches!(first, Err(ServiceError::Unavailable(_))));
        directory
            .grant_access(&"u1".into(), &"c1".into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_user() {
        let directory = directory_with_user();
        let profile = directory.get_user(&"u1".into()).await.unwrap();
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
        assert!(profile.phone.is_none());
    }
}
