//! Engine configuration.
//!
//! Every adapter enumerates the keys it needs up front, so a missing secret
//! is a single well-typed [`Error::ConfigMissing`] at construction time
//! rather than a runtime surprise deep inside a handler.

use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::model::Provider;

/// Deployment environment. Webhook signature verification is bypassed only
/// in [`Environment::Test`]; this is a designed escape hatch for local
/// development and test suites, not a fallback for missing secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Test,
}

impl Environment {
    #[must_use]
    pub fn is_test(&self) -> bool {
        *self == Self::Test
    }

    fn parse(s: &str) -> Self {
        match s {
            "test" | "dev" | "development" | "local" => Self::Test,
            _ => Self::Production,
        }
    }
}

/// Stripe credentials.
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
}

/// Paddle credentials.
#[derive(Clone)]
pub struct PaddleConfig {
    pub api_key: SecretString,
    pub webhook_secret: SecretString,
    /// Use the sandbox API host.
    pub sandbox: bool,
}

/// Lemon Squeezy credentials. `store_id` scopes every catalog call.
#[derive(Clone)]
pub struct LemonSqueezyConfig {
    pub api_key: SecretString,
    pub webhook_secret: SecretString,
    pub store_id: String,
}

/// Retry/backoff policy for outbound provider API calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

/// Top-level engine configuration. Providers are optional: only configured
/// providers accept webhooks or participate in catalog sync.
#[derive(Clone, Default)]
pub struct EngineConfig {
    pub environment: Environment,
    pub stripe: Option<StripeConfig>,
    pub paddle: Option<PaddleConfig>,
    pub lemon_squeezy: Option<LemonSqueezyConfig>,
    pub retry: RetryConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Providers with credentials present.
    #[must_use]
    pub fn configured_providers(&self) -> Vec<Provider> {
        let mut out = Vec::new();
        if self.stripe.is_some() {
            out.push(Provider::Stripe);
        }
        if self.paddle.is_some() {
            out.push(Provider::Paddle);
        }
        if self.lemon_squeezy.is_some() {
            out.push(Provider::LemonSqueezy);
        }
        out
    }

    pub fn stripe(&self) -> Result<&StripeConfig> {
        self.stripe
            .as_ref()
            .ok_or_else(|| Error::config_missing("PAYSYNC_STRIPE_SECRET_KEY"))
    }

    pub fn paddle(&self) -> Result<&PaddleConfig> {
        self.paddle
            .as_ref()
            .ok_or_else(|| Error::config_missing("PAYSYNC_PADDLE_API_KEY"))
    }

    pub fn lemon_squeezy(&self) -> Result<&LemonSqueezyConfig> {
        self.lemon_squeezy
            .as_ref()
            .ok_or_else(|| Error::config_missing("PAYSYNC_LEMON_SQUEEZY_API_KEY"))
    }

    /// The webhook secret for a provider, if configured.
    pub fn webhook_secret(&self, provider: Provider) -> Result<&SecretString> {
        match provider {
            Provider::Stripe => Ok(&self.stripe()?.webhook_secret),
            Provider::Paddle => Ok(&self.paddle()?.webhook_secret),
            Provider::LemonSqueezy => Ok(&self.lemon_squeezy()?.webhook_secret),
        }
    }
}

// Secrets must never leak through Debug output.
impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("environment", &self.environment)
            .field("stripe", &self.stripe.is_some())
            .field("paddle", &self.paddle.is_some())
            .field("lemon_squeezy", &self.lemon_squeezy.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`EngineConfig`] with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct EngineConfigBuilder {
    environment: Environment,
    stripe: Option<StripeConfig>,
    paddle: Option<PaddleConfig>,
    lemon_squeezy: Option<LemonSqueezyConfig>,
    retry: RetryConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            environment: Environment::Production,
            stripe: None,
            paddle: None,
            lemon_squeezy: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn stripe(
        mut self,
        secret_key: impl Into<SecretString>,
        webhook_secret: impl Into<SecretString>,
    ) -> Self {
        self.stripe = Some(StripeConfig {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
        });
        self
    }

    pub fn paddle(
        mut self,
        api_key: impl Into<SecretString>,
        webhook_secret: impl Into<SecretString>,
    ) -> Self {
        self.paddle = Some(PaddleConfig {
            api_key: api_key.into(),
            webhook_secret: webhook_secret.into(),
            sandbox: false,
        });
        self
    }

    pub fn paddle_sandbox(mut self, sandbox: bool) -> Self {
        if let Some(paddle) = self.paddle.as_mut() {
            paddle.sandbox = sandbox;
        }
        self
    }

    pub fn lemon_squeezy(
        mut self,
        api_key: impl Into<SecretString>,
        webhook_secret: impl Into<SecretString>,
        store_id: impl Into<String>,
    ) -> Self {
        self.lemon_squeezy = Some(LemonSqueezyConfig {
            api_key: api_key.into(),
            webhook_secret: webhook_secret.into(),
            store_id: store_id.into(),
        });
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load configuration from `PAYSYNC_*` environment variables.
    ///
    /// A provider is configured when its key variable is present; its
    /// remaining variables are then required at `build()` time.
    pub fn from_env(mut self) -> Self {
        if let Ok(env) = std::env::var("PAYSYNC_ENV") {
            self.environment = Environment::parse(&env);
        }

        if let Ok(key) = std::env::var("PAYSYNC_STRIPE_SECRET_KEY") {
            let secret = std::env::var("PAYSYNC_STRIPE_WEBHOOK_SECRET").unwrap_or_default();
            self = self.stripe(key, secret);
        }
        if let Ok(key) = std::env::var("PAYSYNC_PADDLE_API_KEY") {
            let secret = std::env::var("PAYSYNC_PADDLE_WEBHOOK_SECRET").unwrap_or_default();
            let sandbox = std::env::var("PAYSYNC_PADDLE_SANDBOX")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false);
            self = self.paddle(key, secret).paddle_sandbox(sandbox);
        }
        if let Ok(key) = std::env::var("PAYSYNC_LEMON_SQUEEZY_API_KEY") {
            let secret = std::env::var("PAYSYNC_LEMON_SQUEEZY_WEBHOOK_SECRET").unwrap_or_default();
            let store_id = std::env::var("PAYSYNC_LEMON_SQUEEZY_STORE_ID").unwrap_or_default();
            self = self.lemon_squeezy(key, secret, store_id);
        }

        self
    }

    /// Build the configuration, validating that every configured provider
    /// has its full key set.
    pub fn build(self) -> Result<EngineConfig> {
        use secrecy::ExposeSecret;

        if !self.environment.is_test() {
            if let Some(stripe) = &self.stripe {
                if stripe.webhook_secret.expose_secret().is_empty() {
                    return Err(Error::config_missing("PAYSYNC_STRIPE_WEBHOOK_SECRET"));
                }
            }
            if let Some(paddle) = &self.paddle {
                if paddle.webhook_secret.expose_secret().is_empty() {
                    return Err(Error::config_missing("PAYSYNC_PADDLE_WEBHOOK_SECRET"));
                }
            }
            if let Some(ls) = &self.lemon_squeezy {
                if ls.webhook_secret.expose_secret().is_empty() {
                    return Err(Error::config_missing("PAYSYNC_LEMON_SQUEEZY_WEBHOOK_SECRET"));
                }
            }
        }

        if let Some(ls) = &self.lemon_squeezy {
            if ls.store_id.is_empty() {
                return Err(Error::config_missing("PAYSYNC_LEMON_SQUEEZY_STORE_ID"));
            }
        }

        Ok(EngineConfig {
            environment: self.environment,
            stripe: self.stripe,
            paddle: self.paddle,
            lemon_squeezy: self.lemon_squeezy,
            retry: self.retry,
        })
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
