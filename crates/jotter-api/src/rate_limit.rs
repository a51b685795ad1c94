//! Fixed-window throttling for credential checks and media uploads.
//!
//! Credential checks (the login route and every failed admin-guard check)
//! share the `Login` budget and are keyed by the caller's network address.
//! Forwarding headers only name the caller when the deployment sits behind a
//! trusted proxy. Uploads are keyed by the authenticated admin subject.

use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedEndpoint {
    Login,
    MediaUpload,
}

impl ProtectedEndpoint {
    const ALL: [Self; 2] = [Self::Login, Self::MediaUpload];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::MediaUpload => "media_upload",
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Login => 0,
            Self::MediaUpload => 1,
        }
    }
}

type WindowKey = (ProtectedEndpoint, String);

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    used: u32,
}

#[derive(Default)]
struct EndpointCounters {
    allowed: AtomicU64,
    limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EndpointMetrics {
    pub allowed: u64,
    pub limited: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub login: EndpointMetrics,
    pub media_upload: EndpointMetrics,
    /// Callers with a live window across all endpoints.
    pub tracked_callers: usize,
}

#[derive(Clone)]
pub struct EndpointRateLimiter {
    windows: Arc<Mutex<HashMap<WindowKey, RateWindow>>>,
    window: Duration,
    budgets: [u32; 2],
    counters: Arc<[EndpointCounters; 2]>,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.login_rate_limit_per_window,
            config.upload_rate_limit_per_window,
        )
    }

    fn new(window: Duration, login_budget: u32, upload_budget: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            budgets: [login_budget, upload_budget],
            counters: Arc::new([EndpointCounters::default(), EndpointCounters::default()]),
        }
    }

    /// Spend one unit of `caller`'s budget for `endpoint`.
    pub async fn check(&self, endpoint: ProtectedEndpoint, caller: &str) -> Result<(), AppError> {
        self.check_at(endpoint, caller, Instant::now()).await
    }

    /// Reject `caller` when its budget for `endpoint` is already spent,
    /// without spending any of it.
    pub async fn ensure_available(
        &self,
        endpoint: ProtectedEndpoint,
        caller: &str,
    ) -> Result<(), AppError> {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        match windows.get(&(endpoint, caller.to_string())) {
            Some(window)
                if self.is_live(window, now) && window.used >= self.budget(endpoint) =>
            {
                Err(self.reject(endpoint, caller, window, now))
            }
            _ => Ok(()),
        }
    }

    pub async fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let tracked_callers = self.windows.lock().await.len();
        let [login, media_upload] = ProtectedEndpoint::ALL.map(|endpoint| {
            let counters = &self.counters[endpoint.slot()];
            EndpointMetrics {
                allowed: counters.allowed.load(Ordering::Relaxed),
                limited: counters.limited.load(Ordering::Relaxed),
            }
        });
        RateLimitMetricsSnapshot {
            login,
            media_upload,
            tracked_callers,
        }
    }

    async fn check_at(
        &self,
        endpoint: ProtectedEndpoint,
        caller: &str,
        now: Instant,
    ) -> Result<(), AppError> {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, window| self.is_live(window, now));

        let window = windows
            .entry((endpoint, caller.to_string()))
            .or_insert(RateWindow {
                started_at: now,
                used: 0,
            });
        if window.used >= self.budget(endpoint) {
            return Err(self.reject(endpoint, caller, window, now));
        }

        window.used += 1;
        self.counters[endpoint.slot()]
            .allowed
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    const fn budget(&self, endpoint: ProtectedEndpoint) -> u32 {
        self.budgets[endpoint.slot()]
    }

    fn is_live(&self, window: &RateWindow, now: Instant) -> bool {
        now.saturating_duration_since(window.started_at) < self.window
    }

    fn reject(
        &self,
        endpoint: ProtectedEndpoint,
        caller: &str,
        window: &RateWindow,
        now: Instant,
    ) -> AppError {
        let retry_after_secs = self
            .window
            .saturating_sub(now.saturating_duration_since(window.started_at))
            .as_secs();
        self.counters[endpoint.slot()]
            .limited
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            endpoint = endpoint.label(),
            caller = caller_fingerprint(caller),
            retry_after_secs,
            "Rate limit exceeded"
        );
        AppError::too_many_requests("Rate limit exceeded for protected endpoint", retry_after_secs)
    }
}

/// Rate-limit identity of a caller that has not authenticated yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_key(
            &parts.headers,
            peer,
            state.config.trust_proxy_headers,
        )))
    }
}

/// Pick the caller identity: the first forwarded address when proxy headers
/// are trusted, otherwise the peer IP of the connection.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy_headers: bool) -> String {
    let forwarded = trust_proxy_headers
        .then(|| {
            headers
                .get("x-forwarded-for")
                .or_else(|| headers.get("x-real-ip"))
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
        })
        .flatten();

    forwarded
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown-peer".to_string())
}

pub fn caller_fingerprint(caller: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    caller.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_budget() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 2, 2);

        limiter
            .check(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap();

        let err = limiter
            .check(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, retry) if retry <= 60));

        let metrics = limiter.metrics_snapshot().await;
        assert_eq!(metrics.login.allowed, 2);
        assert_eq!(metrics.login.limited, 1);
        assert_eq!(metrics.media_upload.allowed, 0);
    }

    #[tokio::test]
    async fn budgets_are_per_endpoint_and_caller() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1, 1);

        for (endpoint, caller) in [
            (ProtectedEndpoint::Login, "198.51.100.1"),
            (ProtectedEndpoint::Login, "198.51.100.2"),
            (ProtectedEndpoint::MediaUpload, "198.51.100.1"),
        ] {
            limiter.check(endpoint, caller).await.unwrap();
        }

        let metrics = limiter.metrics_snapshot().await;
        assert_eq!(metrics.login.allowed, 2);
        assert_eq!(metrics.media_upload.allowed, 1);
        assert_eq!(metrics.login.limited, 0);
        assert_eq!(metrics.tracked_callers, 3);
    }

    #[tokio::test]
    async fn ensure_available_only_rejects_spent_budgets() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1, 1);

        limiter
            .ensure_available(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap();
        limiter
            .ensure_available(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap();
        assert_eq!(limiter.metrics_snapshot().await.login.allowed, 0);

        limiter
            .check(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap();
        let err = limiter
            .ensure_available(ProtectedEndpoint::Login, "198.51.100.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(..)));
    }

    #[tokio::test]
    async fn expired_windows_are_pruned_and_budgets_reset() {
        let window = Duration::from_secs(60);
        let limiter = EndpointRateLimiter::new(window, 1, 1);
        let start = Instant::now();

        for index in 0..50 {
            let caller = format!("198.51.100.{index}");
            limiter
                .check_at(ProtectedEndpoint::Login, &caller, start)
                .await
                .unwrap();
        }
        assert_eq!(limiter.metrics_snapshot().await.tracked_callers, 50);

        let later = start + window;
        limiter
            .check_at(ProtectedEndpoint::Login, "198.51.100.0", later)
            .await
            .unwrap();
        assert_eq!(limiter.metrics_snapshot().await.tracked_callers, 1);
    }

    #[test]
    fn client_key_ignores_forwarding_headers_unless_trusted() {
        let peer = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)));
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());

        assert_eq!(client_key(&headers, peer, false), "192.0.2.10");
        assert_eq!(client_key(&headers, peer, true), "203.0.113.7");
        assert_eq!(client_key(&HeaderMap::new(), peer, true), "192.0.2.10");
        assert_eq!(client_key(&HeaderMap::new(), None, false), "unknown-peer");
    }
}
