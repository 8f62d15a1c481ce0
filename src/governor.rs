//! Request admission and access-token lifetime bookkeeping.
//!
//! A single [`Governor`] is owned by the day loop and consulted before every provider call.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{
    download::{ImageryService, Token},
    error::{Error, Result},
};

pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Credential {
    access_token: String,
    issued_at: Instant,
    lifetime: Duration,
}

impl Credential {
    // only half of the declared lifetime is trusted
    fn from_token(token: Token, issued_at: Instant) -> Self {
        Credential {
            access_token: token.access_token,
            issued_at,
            lifetime: Duration::from_secs_f64(token.expires_in as f64 * 0.5),
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) >= self.lifetime
    }
}

#[derive(Debug)]
pub struct Governor {
    max_per_window: usize,
    admitted: VecDeque<Instant>,
    credential: Option<Credential>,
}

impl Governor {
    pub fn new(max_per_window: u32) -> Self {
        let max_per_window = max_per_window.max(1) as usize;

        Governor {
            max_per_window,
            admitted: VecDeque::with_capacity(max_per_window),
            credential: None,
        }
    }

    /// Waits until another request fits in the window, then counts it.
    pub async fn admit(&mut self) {
        if let Some(wait) = self.reserve(Instant::now()) {
            info!(
                "Waiting {:.1}s to stay under {} requests/minute",
                wait.as_secs_f64(),
                self.max_per_window
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Books the next admission slot at or after `now` and returns how long the caller has to
    /// wait for it. Never more than `max_per_window` slots fall in any 60 s span.
    fn reserve(&mut self, now: Instant) -> Option<Duration> {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        let mut slot = now;
        if self.admitted.len() >= self.max_per_window {
            if let Some(oldest) = self.admitted.pop_front() {
                slot = oldest + WINDOW;
            }
        }
        self.admitted.push_back(slot);

        (slot > now).then(|| slot - now)
    }

    /// Returns a live access token, authenticating again when the current one is stale.
    pub async fn credential<S>(&mut self, service: &S) -> Result<String>
    where
        S: ImageryService + ?Sized,
    {
        self.credential_at(service, Instant::now()).await
    }

    async fn credential_at<S>(&mut self, service: &S, now: Instant) -> Result<String>
    where
        S: ImageryService + ?Sized,
    {
        let stale = self
            .credential
            .as_ref()
            .map_or(true, |credential| credential.is_stale(now));

        if stale {
            debug!("Requesting a new access token");
            let token = service.authenticate().await.map_err(|e| match e {
                Error::Authentication(_) => e,
                other => Error::Authentication(other.to_string()),
            })?;
            self.credential = Some(Credential::from_token(token, now));
        }

        match &self.credential {
            Some(credential) => Ok(credential.access_token.clone()),
            None => Err(Error::Authentication("no access token".to_string())),
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{testing::MockService, ProcessResponse};

    fn service() -> MockService {
        MockService::new(|_| ProcessResponse {
            status: 200,
            content_type: None,
            body: vec![],
        })
    }

    fn admission_times(max: u32, requests: usize, spacing: Duration) -> Vec<Instant> {
        let mut governor = Governor::new(max);
        let mut clock = Instant::now();
        let mut times = Vec::with_capacity(requests);

        for _ in 0..requests {
            if let Some(wait) = governor.reserve(clock) {
                clock += wait;
            }
            times.push(clock);
            clock += spacing;
        }

        times
    }

    #[test]
    fn should_not_wait_under_the_limit() {
        let mut governor = Governor::new(5);
        let now = Instant::now();

        for i in 0..5 {
            assert_eq!(governor.reserve(now + Duration::from_secs(i)), None);
        }
    }

    #[test]
    fn should_wait_for_window_when_limit_reached() {
        let mut governor = Governor::new(3);
        let start = Instant::now();

        governor.reserve(start);
        governor.reserve(start + Duration::from_secs(1));
        governor.reserve(start + Duration::from_secs(2));
        let wait = governor.reserve(start + Duration::from_secs(3));

        assert_eq!(wait, Some(Duration::from_secs(57)));
    }

    #[test]
    fn should_never_exceed_max_in_any_window() {
        let max = 10;
        let times = admission_times(max, 300, Duration::from_millis(250));

        for (i, t) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|other| other.duration_since(*t) < WINDOW)
                .count();
            assert!(in_window <= max as usize, "{} requests in one window", in_window);
        }
    }

    #[test]
    fn should_reset_after_quiet_period() {
        let mut governor = Governor::new(2);
        let start = Instant::now();

        governor.reserve(start);
        governor.reserve(start);

        assert_eq!(governor.reserve(start + Duration::from_secs(61)), None);
    }

    #[tokio::test]
    async fn should_reuse_token_until_half_life() {
        let service = service();
        let mut governor = Governor::new(10);
        let start = Instant::now();

        let first = governor.credential_at(&service, start).await.unwrap();
        let again = governor
            .credential_at(&service, start + Duration::from_secs(1799))
            .await
            .unwrap();
        let renewed = governor
            .credential_at(&service, start + Duration::from_secs(1800))
            .await
            .unwrap();

        assert_eq!(first, "token-0");
        assert_eq!(again, "token-0");
        assert_eq!(renewed, "token-1");
        assert_eq!(service.auth_calls(), 2);
    }

    #[tokio::test]
    async fn should_surface_authentication_failure() {
        let service = service().failing_auth();
        let mut governor = Governor::new(10);

        let result = governor.credential(&service).await;

        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(service.auth_calls(), 1);
    }
}
