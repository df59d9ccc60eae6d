use std::sync::Arc;
use tokio::{sync::watch, time::Duration};

use leaky_bucket::RateLimiter;

use crate::server_config::cfg;

const BACKOFF_DURATION: Duration = Duration::from_secs(60);

/// Outbound request pacing, shared by every sync on the server.
///
/// `prompt` paces chat-completion calls; `gmail` spends Gmail quota units
/// (one second's worth of quota refills each second).
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    gmail: Arc<RateLimiter>,
    /// `true` while the chat API asked us to slow down
    backoff: Arc<watch::Sender<bool>>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(
        prompt_limit_per_sec: usize,
        prompt_interval_ms: usize,
        prompt_refill: usize,
        gmail_quota_per_sec: usize,
    ) -> Self {
        let prompt = RateLimiter::builder()
            .initial(1)
            .interval(Duration::from_millis(prompt_interval_ms as u64))
            .max(prompt_limit_per_sec)
            .refill(prompt_refill)
            .build();

        let gmail = RateLimiter::builder()
            .initial(gmail_quota_per_sec)
            .interval(Duration::from_secs(1))
            .max(gmail_quota_per_sec)
            .refill(gmail_quota_per_sec)
            .build();

        Self {
            prompt: Arc::new(prompt),
            gmail: Arc::new(gmail),
            backoff: Arc::new(watch::Sender::new(false)),
            backoff_duration: BACKOFF_DURATION,
        }
    }

    pub fn from_env() -> Self {
        let limits = &cfg.api.prompt_limits;
        Self::new(
            limits.rate_limit_per_sec,
            limits.refill_interval_ms,
            limits.refill_amount,
            cfg.gmail.quota_per_sec,
        )
    }

    pub async fn acquire_prompt(&self) {
        self.wait_for_backoff().await;
        self.prompt.acquire_one().await;
    }

    /// Resolves once no backoff is in effect. Takes no prompt token.
    pub async fn wait_for_backoff(&self) {
        let mut rx = self.backoff.subscribe();
        // Err only if the sender is gone, and `self` holds it
        let _ = rx.wait_for(|backing_off| !*backing_off).await;
    }

    /// Spend `units` of Gmail quota, waiting for the bucket to refill if needed
    pub async fn acquire_gmail(&self, units: usize) {
        self.gmail.acquire(units.min(self.gmail.max())).await;
    }

    pub fn is_backing_off(&self) -> bool {
        *self.backoff.borrow()
    }

    pub fn trigger_backoff(&self) {
        if self.backoff.send_replace(true) {
            return;
        }
        tracing::info!("Triggering backoff for {:?}...", self.backoff_duration);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.send_replace(false);
        });
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        let gmail_bucket = format!("{}/{}", self.gmail.balance(), self.gmail.max());
        if self.is_backing_off() {
            format!("prompts: {} gmail: {} (BACKOFF)", prompt_bucket, gmail_bucket)
        } else {
            format!("prompts: {} gmail: {}", prompt_bucket, gmail_bucket)
        }
    }
}
