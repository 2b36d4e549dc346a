//! Security test generation over the API-security category taxonomy.
//!
//! A [`TestGenerationDispatcher`] maps each category to exactly one
//! [`CategoryTestGenerator`] and fans generation out with one task per
//! category. A failing category is skipped with a warning rather than
//! failing the batch; surviving tests are concatenated in registration
//! order and deduplicated by `(name, target_endpoint)`, first occurrence
//! winning.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::Result;

/// The ten API-security test categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityTestCategory {
    BrokenObjectLevelAuthorization,
    BrokenAuthentication,
    BrokenObjectPropertyAuthorization,
    UnrestrictedResourceConsumption,
    BrokenFunctionLevelAuthorization,
    SensitiveBusinessFlows,
    ServerSideRequestForgery,
    SecurityMisconfiguration,
    ImproperInventoryManagement,
    UnsafeApiConsumption,
}

impl SecurityTestCategory {
    pub const ALL: [SecurityTestCategory; 10] = [
        SecurityTestCategory::BrokenObjectLevelAuthorization,
        SecurityTestCategory::BrokenAuthentication,
        SecurityTestCategory::BrokenObjectPropertyAuthorization,
        SecurityTestCategory::UnrestrictedResourceConsumption,
        SecurityTestCategory::BrokenFunctionLevelAuthorization,
        SecurityTestCategory::SensitiveBusinessFlows,
        SecurityTestCategory::ServerSideRequestForgery,
        SecurityTestCategory::SecurityMisconfiguration,
        SecurityTestCategory::ImproperInventoryManagement,
        SecurityTestCategory::UnsafeApiConsumption,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SecurityTestCategory::BrokenObjectLevelAuthorization => "broken_object_level_authorization",
            SecurityTestCategory::BrokenAuthentication => "broken_authentication",
            SecurityTestCategory::BrokenObjectPropertyAuthorization => {
                "broken_object_property_authorization"
            }
            SecurityTestCategory::UnrestrictedResourceConsumption => {
                "unrestricted_resource_consumption"
            }
            SecurityTestCategory::BrokenFunctionLevelAuthorization => {
                "broken_function_level_authorization"
            }
            SecurityTestCategory::SensitiveBusinessFlows => "sensitive_business_flows",
            SecurityTestCategory::ServerSideRequestForgery => "server_side_request_forgery",
            SecurityTestCategory::SecurityMisconfiguration => "security_misconfiguration",
            SecurityTestCategory::ImproperInventoryManagement => "improper_inventory_management",
            SecurityTestCategory::UnsafeApiConsumption => "unsafe_api_consumption",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One generated security test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityTest {
    pub name: String,
    pub description: String,
    pub category: SecurityTestCategory,
    pub target_endpoint: String,
    pub severity: Severity,
    pub steps: Vec<String>,
}

/// What to generate tests against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGenRequest {
    pub api_name: String,
    pub endpoints: Vec<String>,
}

/// Generator for one or more categories.
#[async_trait]
pub trait CategoryTestGenerator: Send + Sync {
    /// Generate tests for `category` against the request's endpoints. An
    /// error skips the category; it never fails the whole batch.
    async fn generate(
        &self,
        category: SecurityTestCategory,
        request: &TestGenRequest,
    ) -> Result<Vec<SecurityTest>>;
}

/// Fans test generation out per category and merges the results.
pub struct TestGenerationDispatcher {
    // Registration order is the output order.
    registrations: Vec<(SecurityTestCategory, Arc<dyn CategoryTestGenerator>)>,
}

impl TestGenerationDispatcher {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Dispatcher using the built-in template generator for every category.
    pub fn with_templates() -> Self {
        let generator: Arc<dyn CategoryTestGenerator> = Arc::new(TemplateTestGenerator);
        let mut dispatcher = Self::new();
        for category in SecurityTestCategory::ALL {
            dispatcher.register(category, Arc::clone(&generator));
        }
        dispatcher
    }

    /// Map `category` to `generator`. Registering a category twice replaces
    /// the earlier mapping but keeps its position in the output order.
    pub fn register(
        &mut self,
        category: SecurityTestCategory,
        generator: Arc<dyn CategoryTestGenerator>,
    ) {
        if let Some(slot) = self
            .registrations
            .iter_mut()
            .find(|(existing, _)| *existing == category)
        {
            slot.1 = generator;
        } else {
            self.registrations.push((category, generator));
        }
    }

    pub fn categories(&self) -> Vec<SecurityTestCategory> {
        self.registrations.iter().map(|(c, _)| *c).collect()
    }

    /// Generate tests across every registered category.
    pub async fn generate_all(&self, request: &TestGenRequest) -> Vec<SecurityTest> {
        let request = Arc::new(request.clone());
        let mut join_set: JoinSet<(usize, SecurityTestCategory, Result<Vec<SecurityTest>>)> =
            JoinSet::new();
        for (idx, (category, generator)) in self.registrations.iter().enumerate() {
            let category = *category;
            let generator = Arc::clone(generator);
            let task_request = Arc::clone(&request);
            join_set.spawn(async move {
                let tests = generator.generate(category, &task_request).await;
                (idx, category, tests)
            });
        }

        // Reassemble by registration index so output order is stable.
        let mut slots: Vec<Option<Vec<SecurityTest>>> = vec![None; self.registrations.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, category, Ok(tests))) => {
                    info!(
                        category = category.label(),
                        count = tests.len(),
                        "category generated"
                    );
                    slots[idx] = Some(tests);
                }
                Ok((_, category, Err(err))) => {
                    warn!(category = category.label(), error = %err, "category skipped");
                }
                Err(join_err) => {
                    warn!(error = %join_err, "generation task aborted");
                }
            }
        }

        let merged: Vec<SecurityTest> = slots.into_iter().flatten().flatten().collect();
        dedupe_tests(merged)
    }
}

impl Default for TestGenerationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop duplicates by `(name, target_endpoint)`, keeping the first.
fn dedupe_tests(tests: Vec<SecurityTest>) -> Vec<SecurityTest> {
    let mut seen = HashSet::new();
    tests
        .into_iter()
        .filter(|test| seen.insert((test.name.clone(), test.target_endpoint.clone())))
        .collect()
}

/// Canned per-category test templates, usable without a model provider.
pub struct TemplateTestGenerator;

impl TemplateTestGenerator {
    fn template(category: SecurityTestCategory) -> (&'static str, &'static str, Severity, &'static [&'static str]) {
        match category {
            SecurityTestCategory::BrokenObjectLevelAuthorization => (
                "Access another user's object by id",
                "Request an object owned by a different user and verify a 403 or 404.",
                Severity::Critical,
                &[
                    "Authenticate as user A",
                    "Request an object id belonging to user B",
                    "Verify the response denies access",
                ],
            ),
            SecurityTestCategory::BrokenAuthentication => (
                "Call endpoint without credentials",
                "Invoke the endpoint with no token and with an expired token.",
                Severity::Critical,
                &[
                    "Send the request without an Authorization header",
                    "Send the request with an expired token",
                    "Verify both responses are 401",
                ],
            ),
            SecurityTestCategory::BrokenObjectPropertyAuthorization => (
                "Mass-assign restricted properties",
                "Submit extra properties (role, owner) in the request body.",
                Severity::High,
                &[
                    "Send an update including a privileged field",
                    "Verify the field is ignored or rejected",
                ],
            ),
            SecurityTestCategory::UnrestrictedResourceConsumption => (
                "Oversized page and payload requests",
                "Request maximum page sizes and oversized bodies in a tight loop.",
                Severity::Medium,
                &[
                    "Request the endpoint with page_size well beyond the documented cap",
                    "Verify pagination limits and rate limits apply",
                ],
            ),
            SecurityTestCategory::BrokenFunctionLevelAuthorization => (
                "Invoke admin function as regular user",
                "Call administrative operations with a non-admin token.",
                Severity::Critical,
                &[
                    "Authenticate as a regular user",
                    "Invoke the admin variant of the endpoint",
                    "Verify the response is 403",
                ],
            ),
            SecurityTestCategory::SensitiveBusinessFlows => (
                "Replay sensitive flow excessively",
                "Drive the business flow repeatedly from one account.",
                Severity::Medium,
                &[
                    "Execute the flow end to end",
                    "Repeat immediately many times",
                    "Verify abuse controls trigger",
                ],
            ),
            SecurityTestCategory::ServerSideRequestForgery => (
                "Supply internal URL in fetch parameter",
                "Point any URL-accepting parameter at internal addresses.",
                Severity::High,
                &[
                    "Submit http://169.254.169.254/ as the URL parameter",
                    "Verify the server refuses to fetch it",
                ],
            ),
            SecurityTestCategory::SecurityMisconfiguration => (
                "Probe verbose errors and default headers",
                "Trigger errors and inspect headers for stack traces and missing hardening.",
                Severity::Medium,
                &[
                    "Send a malformed request body",
                    "Verify the error response leaks no internals",
                    "Verify security headers are present",
                ],
            ),
            SecurityTestCategory::ImproperInventoryManagement => (
                "Probe older API versions",
                "Try versioned path prefixes below the current one.",
                Severity::Low,
                &[
                    "Replace the version segment with v1, v0, beta",
                    "Verify retired versions are not served",
                ],
            ),
            SecurityTestCategory::UnsafeApiConsumption => (
                "Feed hostile upstream responses",
                "Simulate a compromised third-party API returning oversized and malformed data.",
                Severity::Medium,
                &[
                    "Stub the upstream with malformed JSON",
                    "Verify the endpoint fails closed without echoing the payload",
                ],
            ),
        }
    }
}

#[async_trait]
impl CategoryTestGenerator for TemplateTestGenerator {
    async fn generate(
        &self,
        category: SecurityTestCategory,
        request: &TestGenRequest,
    ) -> Result<Vec<SecurityTest>> {
        let (name, description, severity, steps) = Self::template(category);
        Ok(request
            .endpoints
            .iter()
            .map(|endpoint| SecurityTest {
                name: name.to_string(),
                description: description.to_string(),
                category,
                target_endpoint: endpoint.clone(),
                severity,
                steps: steps.iter().map(|s| s.to_string()).collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrosscheckError;

    struct FixedGenerator {
        name: &'static str,
        severity: Severity,
    }

    #[async_trait]
    impl CategoryTestGenerator for FixedGenerator {
        async fn generate(
            &self,
            category: SecurityTestCategory,
            request: &TestGenRequest,
        ) -> Result<Vec<SecurityTest>> {
            Ok(request
                .endpoints
                .iter()
                .map(|endpoint| SecurityTest {
                    name: self.name.to_string(),
                    description: String::new(),
                    category,
                    target_endpoint: endpoint.clone(),
                    severity: self.severity,
                    steps: vec![],
                })
                .collect())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl CategoryTestGenerator for FailingGenerator {
        async fn generate(
            &self,
            _category: SecurityTestCategory,
            _request: &TestGenRequest,
        ) -> Result<Vec<SecurityTest>> {
            Err(CrosscheckError::ServiceUnavailable {
                detail: "generator backend down".to_string(),
            })
        }
    }

    fn request() -> TestGenRequest {
        TestGenRequest {
            api_name: "orders".to_string(),
            endpoints: vec!["/orders".to_string(), "/orders/{id}".to_string()],
        }
    }

    #[tokio::test]
    async fn test_templates_cover_every_category() {
        let dispatcher = TestGenerationDispatcher::with_templates();
        let tests = dispatcher.generate_all(&request()).await;
        // 10 categories x 2 endpoints, no duplicate (name, endpoint) pairs.
        assert_eq!(tests.len(), 20);
        for category in SecurityTestCategory::ALL {
            assert!(tests.iter().any(|t| t.category == category));
        }
    }

    #[tokio::test]
    async fn test_output_follows_registration_order() {
        let mut dispatcher = TestGenerationDispatcher::new();
        dispatcher.register(
            SecurityTestCategory::ServerSideRequestForgery,
            Arc::new(FixedGenerator {
                name: "ssrf probe",
                severity: Severity::High,
            }),
        );
        dispatcher.register(
            SecurityTestCategory::BrokenAuthentication,
            Arc::new(FixedGenerator {
                name: "auth probe",
                severity: Severity::Critical,
            }),
        );

        let tests = dispatcher.generate_all(&request()).await;
        assert_eq!(tests.len(), 4);
        assert_eq!(
            tests[0].category,
            SecurityTestCategory::ServerSideRequestForgery
        );
        assert_eq!(tests[2].category, SecurityTestCategory::BrokenAuthentication);
    }

    #[tokio::test]
    async fn test_failed_category_is_skipped_not_fatal() {
        let mut dispatcher = TestGenerationDispatcher::new();
        dispatcher.register(
            SecurityTestCategory::BrokenAuthentication,
            Arc::new(FailingGenerator),
        );
        dispatcher.register(
            SecurityTestCategory::SecurityMisconfiguration,
            Arc::new(FixedGenerator {
                name: "config probe",
                severity: Severity::Medium,
            }),
        );

        let tests = dispatcher.generate_all(&request()).await;
        assert_eq!(tests.len(), 2);
        assert!(tests
            .iter()
            .all(|t| t.category == SecurityTestCategory::SecurityMisconfiguration));
    }

    #[tokio::test]
    async fn test_dedupe_keeps_first_occurrence() {
        let mut dispatcher = TestGenerationDispatcher::new();
        // Two categories emitting the same (name, endpoint) pairs; the
        // earlier registration wins.
        dispatcher.register(
            SecurityTestCategory::BrokenObjectLevelAuthorization,
            Arc::new(FixedGenerator {
                name: "shared probe",
                severity: Severity::Critical,
            }),
        );
        dispatcher.register(
            SecurityTestCategory::UnsafeApiConsumption,
            Arc::new(FixedGenerator {
                name: "shared probe",
                severity: Severity::Low,
            }),
        );

        let tests = dispatcher.generate_all(&request()).await;
        assert_eq!(tests.len(), 2);
        assert!(tests
            .iter()
            .all(|t| t.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn test_replacing_registration_keeps_position() {
        let mut dispatcher = TestGenerationDispatcher::new();
        dispatcher.register(
            SecurityTestCategory::BrokenAuthentication,
            Arc::new(FailingGenerator),
        );
        dispatcher.register(
            SecurityTestCategory::BrokenAuthentication,
            Arc::new(FixedGenerator {
                name: "auth probe",
                severity: Severity::Critical,
            }),
        );
        assert_eq!(
            dispatcher.categories(),
            vec![SecurityTestCategory::BrokenAuthentication]
        );
        let tests = dispatcher.generate_all(&request()).await;
        assert_eq!(tests.len(), 2);
    }
}
