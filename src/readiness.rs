//! Application readiness: backend health endpoint, then the frontend.

use std::time::Duration;

use tokio::time::Instant;

use crate::errors::ReadinessError;
use crate::events::StageReporter;

#[derive(Debug, Clone)]
pub struct ReadinessSettings {
    pub backend_url: String,
    pub frontend_url: String,
    pub backend_timeout: Duration,
    pub frontend_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound for a single request.
    pub request_timeout: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000/api/v1/healthz".to_string(),
            frontend_url: "http://127.0.0.1:5173/".to_string(),
            backend_timeout: Duration::from_secs(120),
            frontend_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ReadinessWaiter {
    client: reqwest::Client,
    settings: ReadinessSettings,
}

impl ReadinessWaiter {
    pub fn new(settings: ReadinessSettings) -> Result<Self, ReadinessError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(ReadinessError::Client)?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ReadinessSettings {
        &self.settings
    }

    /// Wait for the backend (first half of the stage) and then the frontend.
    pub async fn wait(&self, reporter: &StageReporter) -> Result<(), ReadinessError> {
        self.wait_endpoint(
            "backend",
            &self.settings.backend_url,
            self.settings.backend_timeout,
            (0.0, 50.0),
            reporter,
        )
        .await?;
        self.wait_endpoint(
            "frontend",
            &self.settings.frontend_url,
            self.settings.frontend_timeout,
            (50.0, 100.0),
            reporter,
        )
        .await
    }

    async fn wait_endpoint(
        &self,
        endpoint: &'static str,
        url: &str,
        budget: Duration,
        (from, to): (f64, f64),
        reporter: &StageReporter,
    ) -> Result<(), ReadinessError> {
        let started = Instant::now();
        reporter.progress(from, format!("Waiting for {}", endpoint));

        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            if !remaining.is_zero() && self.probe(url, remaining).await {
                tracing::info!(endpoint, url, elapsed_ms = started.elapsed().as_millis() as u64, "endpoint ready");
                reporter.progress(to, format!("{} ready", endpoint));
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= budget {
                return Err(ReadinessError::NotReady {
                    endpoint,
                    url: url.to_string(),
                    elapsed,
                });
            }
            let ratio = elapsed.as_secs_f64() / budget.as_secs_f64();
            reporter.progress(
                from + (to - from) * ratio,
                format!("Waiting for {} ({}s)", endpoint, elapsed.as_secs()),
            );
            tokio::time::sleep(self.settings.poll_interval.min(budget - elapsed)).await;
        }
    }

    /// Ready means any status in `[200, 500)`.
    async fn probe(&self, url: &str, remaining: Duration) -> bool {
        let timeout = self.settings.request_timeout.min(remaining);
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!(url, status, "readiness probe");
                (200..500).contains(&status)
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "readiness probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StartupStage;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route("/health", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/health", addr)
    }

    /// A URL on a port nothing listens on.
    async fn closed_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/", addr)
    }

    fn settings(backend_url: String, frontend_url: String) -> ReadinessSettings {
        ReadinessSettings {
            backend_url,
            frontend_url,
            backend_timeout: Duration::from_secs(2),
            frontend_timeout: Duration::from_millis(600),
            poll_interval: Duration::from_millis(100),
            request_timeout: Duration::from_millis(200),
        }
    }

    fn reporter() -> StageReporter {
        StageReporter::detached(StartupStage::Health)
    }

    #[tokio::test]
    async fn test_ready_when_both_answer() {
        let backend = serve(StatusCode::OK).await;
        let frontend = serve(StatusCode::OK).await;
        let waiter = ReadinessWaiter::new(settings(backend, frontend)).unwrap();
        waiter.wait(&reporter()).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_errors_count_as_ready() {
        let backend = serve(StatusCode::NOT_FOUND).await;
        let frontend = serve(StatusCode::UNAUTHORIZED).await;
        let waiter = ReadinessWaiter::new(settings(backend, frontend)).unwrap();
        waiter.wait(&reporter()).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_not_ready() {
        let backend = serve(StatusCode::SERVICE_UNAVAILABLE).await;
        let frontend = serve(StatusCode::OK).await;
        let mut s = settings(backend.clone(), frontend);
        s.backend_timeout = Duration::from_millis(500);
        let waiter = ReadinessWaiter::new(s).unwrap();

        let err = waiter.wait(&reporter()).await.unwrap_err();

        match err {
            ReadinessError::NotReady { endpoint, url, .. } => {
                assert_eq!(endpoint, "backend");
                assert_eq!(url, backend);
            }
            other => panic!("Expected NotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frontend_never_answers_fails_after_its_budget() {
        let backend = serve(StatusCode::OK).await;
        let frontend = closed_url().await;
        let waiter = ReadinessWaiter::new(settings(backend, frontend)).unwrap();

        let err = waiter.wait(&reporter()).await.unwrap_err();

        assert!(err.to_string().starts_with("frontend not ready"), "{}", err);
        match err {
            ReadinessError::NotReady { endpoint, elapsed, .. } => {
                assert_eq!(endpoint, "frontend");
                assert!(elapsed >= Duration::from_millis(600));
                assert!(elapsed < Duration::from_millis(1500), "elapsed {:?}", elapsed);
            }
            other => panic!("Expected NotReady, got {:?}", other),
        }
    }
}
