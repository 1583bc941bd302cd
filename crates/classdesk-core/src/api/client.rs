//! Typed operations against the administration REST API.
//!
//! `ApiClient` does not know about tokens: it hands every request to a
//! [`RequestExecutor`], normally a `WithReauth` around the HTTP transport.
//! Reads go through the optional [`QueryCache`]; mutations invalidate the
//! tags they affect.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, ApiResponse, RequestExecutor};
use crate::cache::{CacheTag, QueryCache};
use crate::models::{
    Assignment, AttendanceMark, AttendanceRecord, Class, ClassOverview, ClassSession, NewAssignment, NewClass,
    NewStudent, Student, Teacher, UserProfile,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the administration backend.
/// Clone is cheap - executor and cache are shared.
#[derive(Clone)]
pub struct ApiClient {
    executor: Arc<dyn RequestExecutor>,
    cache: Option<Arc<QueryCache>>,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            executor,
            cache: None,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// Serve reads from `cache` and keep it consistent on writes
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    // ===== Request helpers =====

    /// Execute a request, backing off on 429 and mapping error statuses
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.executor.execute(&request).await?;
            if response.status.as_u16() != 429 {
                return response.error_for_status();
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                ?backoff,
                "Rate limited, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }

    /// GET `path`, answering from the cache when a fresh entry exists
    async fn get_cached<T>(&self, path: &str, tags: &[CacheTag]) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Serialize,
    {
        let scope = match self.cache {
            Some(ref cache) => {
                if let Some(hit) = cache.get::<T>(path).await {
                    debug!(path, "Cache hit");
                    return Ok(hit);
                }
                cache.scope()
            }
            None => 0,
        };

        let value: T = self.fetch(ApiRequest::get(path)).await?;
        if let Some(ref cache) = self.cache {
            cache.put_in_scope(scope, path, &value, tags).await;
        }
        Ok(value)
    }

    async fn invalidate(&self, tags: &[CacheTag]) {
        if let Some(ref cache) = self.cache {
            for tag in tags {
                cache.invalidate(*tag).await;
            }
        }
    }

    // ===== Classes =====

    pub async fn list_classes(&self) -> Result<Vec<Class>, ApiError> {
        self.get_cached("/Classes", &[CacheTag::Classes]).await
    }

    pub async fn get_class(&self, class_id: i64) -> Result<Class, ApiError> {
        self.get_cached(&format!("/Classes/{}", class_id), &[CacheTag::Class(class_id)])
            .await
    }

    pub async fn create_class(&self, class: &NewClass) -> Result<Class, ApiError> {
        let created: Class = self.fetch(ApiRequest::post("/Classes").with_json(class)?).await?;
        self.invalidate(&[CacheTag::Classes]).await;
        Ok(created)
    }

    pub async fn update_class(&self, class_id: i64, class: &NewClass) -> Result<Class, ApiError> {
        let request = ApiRequest::put(format!("/Classes/{}", class_id)).with_json(class)?;
        let updated: Class = self.fetch(request).await?;
        self.invalidate(&[CacheTag::Classes, CacheTag::Class(class_id)]).await;
        Ok(updated)
    }

    /// Fetch a class with its sessions and assignments in parallel
    pub async fn class_overview(&self, class_id: i64) -> Result<ClassOverview, ApiError> {
        let (class, sessions, assignments) = futures::try_join!(
            self.get_class(class_id),
            self.list_sessions(class_id),
            self.list_assignments(class_id),
        )?;
        Ok(ClassOverview {
            class,
            sessions,
            assignments,
        })
    }

    // ===== Teachers =====

    pub async fn list_teachers(&self) -> Result<Vec<Teacher>, ApiError> {
        self.get_cached("/Teachers", &[CacheTag::Teachers]).await
    }

    pub async fn get_teacher(&self, teacher_id: i64) -> Result<Teacher, ApiError> {
        self.get_cached(&format!("/Teachers/{}", teacher_id), &[CacheTag::Teachers])
            .await
    }

    // ===== Students =====

    pub async fn list_students(&self) -> Result<Vec<Student>, ApiError> {
        self.get_cached("/Students", &[CacheTag::Students]).await
    }

    pub async fn get_student(&self, student_id: i64) -> Result<Student, ApiError> {
        self.get_cached(&format!("/Students/{}", student_id), &[CacheTag::Students])
            .await
    }

    /// Server-side name search. Not cached.
    pub async fn search_students(&self, query: &str) -> Result<Vec<Student>, ApiError> {
        self.fetch(ApiRequest::get("/Students").with_query("search", query))
            .await
    }

    pub async fn create_student(&self, student: &NewStudent) -> Result<Student, ApiError> {
        let created: Student = self.fetch(ApiRequest::post("/Students").with_json(student)?).await?;
        self.invalidate(&[CacheTag::Students]).await;
        Ok(created)
    }

    // ===== Sessions & attendance =====

    pub async fn list_sessions(&self, class_id: i64) -> Result<Vec<ClassSession>, ApiError> {
        self.get_cached(
            &format!("/Classes/{}/Sessions", class_id),
            &[CacheTag::Sessions(class_id)],
        )
        .await
    }

    pub async fn get_attendance(&self, session_id: i64) -> Result<Vec<AttendanceRecord>, ApiError> {
        self.get_cached(
            &format!("/Sessions/{}/Attendance", session_id),
            &[CacheTag::Attendance(session_id)],
        )
        .await
    }

    pub async fn mark_attendance(&self, session_id: i64, marks: &[AttendanceMark]) -> Result<(), ApiError> {
        let request = ApiRequest::put(format!("/Sessions/{}/Attendance", session_id)).with_json(marks)?;
        self.send(request).await?;
        self.invalidate(&[CacheTag::Attendance(session_id)]).await;
        Ok(())
    }

    // ===== Assignments =====

    pub async fn list_assignments(&self, class_id: i64) -> Result<Vec<Assignment>, ApiError> {
        self.get_cached(
            &format!("/Classes/{}/Assignments", class_id),
            &[CacheTag::Assignments(class_id)],
        )
        .await
    }

    pub async fn create_assignment(
        &self,
        class_id: i64,
        assignment: &NewAssignment,
    ) -> Result<Assignment, ApiError> {
        let request = ApiRequest::post(format!("/Classes/{}/Assignments", class_id)).with_json(assignment)?;
        let created: Assignment = self.fetch(request).await?;
        self.invalidate(&[CacheTag::Assignments(class_id)]).await;
        Ok(created)
    }

    // ===== Users =====

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get_cached("/Users/me", &[CacheTag::CurrentUser]).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemorySessionRepository, SessionStore};
    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned responses keyed by "METHOD path"; records every request.
    #[derive(Default)]
    struct ScriptedBackend {
        routes: Mutex<HashMap<String, Vec<ApiResponse>>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedBackend {
        fn route(&self, method: Method, path: &str, status: u16, body: &str) {
            let status = StatusCode::from_u16(status).expect("bad status");
            self.routes
                .lock()
                .expect("lock poisoned")
                .entry(format!("{} {}", method, path))
                .or_default()
                .push(ApiResponse::new(status, body));
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().expect("lock poisoned").clone()
        }

        fn count(&self, method: Method, path: &str) -> usize {
            self.requests()
                .iter()
                .filter(|r| r.method == method && r.path == path)
                .count()
        }
    }

    #[async_trait]
    impl RequestExecutor for ScriptedBackend {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().expect("lock poisoned").push(request.clone());
            let key = format!("{} {}", request.method, request.path);
            let mut routes = self.routes.lock().expect("lock poisoned");
            match routes.get_mut(&key) {
                // Last scripted response repeats
                Some(queue) if queue.len() > 1 => Ok(queue.remove(0)),
                Some(queue) => Ok(queue[0].clone()),
                None => Ok(ApiResponse::new(StatusCode::NOT_FOUND, "")),
            }
        }
    }

    const CLASSES: &str = r#"[{"id": 12, "name": "Algebra I", "capacity": 20, "studentCount": 18}]"#;
    const CLASS: &str = r#"{"id": 12, "name": "Algebra I", "capacity": 20, "studentCount": 18}"#;

    fn client(backend: &Arc<ScriptedBackend>) -> ApiClient {
        ApiClient::new(backend.clone()).with_backoff(Duration::from_millis(1))
    }

    fn cached_client(backend: &Arc<ScriptedBackend>) -> ApiClient {
        client(backend).with_cache(Arc::new(QueryCache::new()))
    }

    #[tokio::test]
    async fn test_list_classes() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Classes", 200, CLASSES);

        let classes = client(&backend).list_classes().await.expect("list_classes failed");
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "Algebra I");
        assert_eq!(classes[0].seats_remaining(), Some(2));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Classes/99", 404, "no such class");
        backend.route(Method::GET, "/Users/me", 401, "");

        let api = client(&backend);
        assert!(matches!(api.get_class(99).await, Err(ApiError::NotFound(_))));
        let err = api.current_user().await.expect_err("expected 401");
        assert!(err.requires_login());
    }

    #[tokio::test]
    async fn test_rate_limit_backoff() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Teachers", 429, "");
        backend.route(Method::GET, "/Teachers", 429, "");
        backend.route(Method::GET, "/Teachers", 200, "[]");

        let teachers = client(&backend).list_teachers().await.expect("list_teachers failed");
        assert!(teachers.is_empty());
        assert_eq!(backend.count(Method::GET, "/Teachers"), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Teachers", 429, "");

        let result = client(&backend).list_teachers().await;
        assert!(matches!(result, Err(ApiError::RateLimited)));
        assert_eq!(backend.count(Method::GET, "/Teachers"), 1 + MAX_RATE_LIMIT_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_reads_are_cached() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Classes", 200, CLASSES);

        let api = cached_client(&backend);
        api.list_classes().await.expect("first read failed");
        api.list_classes().await.expect("second read failed");
        assert_eq!(backend.count(Method::GET, "/Classes"), 1);
    }

    #[tokio::test]
    async fn test_update_class_invalidates() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Classes", 200, CLASSES);
        backend.route(Method::GET, "/Classes/12", 200, CLASS);
        backend.route(Method::PUT, "/Classes/12", 200, CLASS);

        let api = cached_client(&backend);
        api.list_classes().await.expect("list failed");
        api.get_class(12).await.expect("get failed");

        let update = NewClass {
            name: "Algebra I".to_string(),
            capacity: Some(20),
            ..Default::default()
        };
        api.update_class(12, &update).await.expect("update failed");

        let put = backend
            .requests()
            .into_iter()
            .find(|r| r.method == Method::PUT)
            .expect("no PUT sent");
        assert_eq!(put.body.as_ref().and_then(|b| b["capacity"].as_i64()), Some(20));

        api.list_classes().await.expect("list failed");
        api.get_class(12).await.expect("get failed");
        assert_eq!(backend.count(Method::GET, "/Classes"), 2);
        assert_eq!(backend.count(Method::GET, "/Classes/12"), 2);
    }

    #[tokio::test]
    async fn test_mark_attendance_accepts_empty_body() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(
            Method::GET,
            "/Sessions/7/Attendance",
            200,
            r#"[{"studentId": 1, "status": "Absent"}]"#,
        );
        backend.route(Method::PUT, "/Sessions/7/Attendance", 204, "");

        let api = cached_client(&backend);
        let before = api.get_attendance(7).await.expect("get failed");
        assert_eq!(before.len(), 1);

        let marks = vec![AttendanceMark {
            student_id: 1,
            status: crate::models::AttendanceStatus::Present,
            note: None,
        }];
        api.mark_attendance(7, &marks).await.expect("mark failed");

        api.get_attendance(7).await.expect("get failed");
        assert_eq!(backend.count(Method::GET, "/Sessions/7/Attendance"), 2);
    }

    #[tokio::test]
    async fn test_search_students_sends_query() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Students", 200, "[]");

        client(&backend).search_students("ada").await.expect("search failed");
        let sent = backend.requests();
        assert_eq!(sent[0].query, vec![("search".to_string(), "ada".to_string())]);
    }

    #[tokio::test]
    async fn test_class_overview() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Classes/12", 200, CLASS);
        backend.route(
            Method::GET,
            "/Classes/12/Sessions",
            200,
            r#"[{"id": 1, "classId": 12, "startsAt": "2099-01-05T15:00:00Z"}]"#,
        );
        backend.route(
            Method::GET,
            "/Classes/12/Assignments",
            200,
            r#"[{"id": 3, "classId": 12, "title": "Worksheet 4"}]"#,
        );

        let overview = client(&backend).class_overview(12).await.expect("overview failed");
        assert_eq!(overview.class.id, 12);
        assert_eq!(overview.upcoming_sessions().count(), 1);
        assert_eq!(overview.assignments[0].title, "Worksheet 4");
    }

    #[tokio::test]
    async fn test_class_overview_fails_if_any_part_fails() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.route(Method::GET, "/Classes/12", 200, CLASS);
        backend.route(Method::GET, "/Classes/12/Sessions", 500, "boom");
        backend.route(Method::GET, "/Classes/12/Assignments", 200, "[]");

        let result = client(&backend).class_overview(12).await;
        assert!(matches!(result, Err(ApiError::ServerError(_))));
    }

    /// Switches from user A to user B while answering the first read.
    struct SwitchingBackend {
        store: SessionStore,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl RequestExecutor for SwitchingBackend {
        async fn execute(&self, _request: &ApiRequest) -> Result<ApiResponse, ApiError> {
            let call = {
                let mut calls = self.calls.lock().expect("lock poisoned");
                *calls += 1;
                *calls
            };
            if call == 1 {
                self.store.clear_auth().await;
                self.store
                    .set_auth("tokB", "refB", Some(UserProfile::named("B")))
                    .await
                    .expect("set_auth failed");
                return Ok(ApiResponse::new(
                    StatusCode::OK,
                    r#"[{"id": 1, "firstName": "userA", "lastName": "student"}]"#,
                ));
            }
            Ok(ApiResponse::new(
                StatusCode::OK,
                r#"[{"id": 2, "firstName": "userB", "lastName": "student"}]"#,
            ))
        }
    }

    #[tokio::test]
    async fn test_read_answered_after_user_switch_is_not_cached() {
        let store = SessionStore::new(Arc::new(MemorySessionRepository::new()));
        store
            .set_auth("tokA", "refA", Some(UserProfile::named("A")))
            .await
            .expect("set_auth failed");
        let backend = Arc::new(SwitchingBackend {
            store: store.clone(),
            calls: Mutex::new(0),
        });
        let api = ApiClient::new(backend.clone()).with_cache(Arc::new(QueryCache::scoped_to(&store)));

        let first = api.list_students().await.expect("first read failed");
        assert_eq!(first[0].first_name, "userA");

        let second = api.list_students().await.expect("second read failed");
        assert_eq!(second[0].first_name, "userB");
        assert_eq!(*backend.calls.lock().expect("lock poisoned"), 2);
    }
}
