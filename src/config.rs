/**
 * INFRASTRUCTURE LAYER - Configuration
 *
 * Config: the settings manager - where environment variables become
 * useful data.
 *
 * Architecture Layer: Infrastructure (Layer 6)
 * Dependencies: Environment variables
 *
 * Centralized so the isolation-level/idempotency/merchant-id wiring in
 * §6 and §9 happens once, at startup, instead of being re-read at call
 * sites.
 */

use std::env;

/// `STRIPE_MODE` selects which merchant-id field the gateway adapter
/// routes destination accounts through (§6, §9: "replace global
/// stripeIsLive with an injected configuration").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StripeMode {
    Live,
    Test,
}

impl StripeMode {
    fn from_env_str(s: &str) -> Self {
        match s {
            "live" => StripeMode::Live,
            _ => StripeMode::Test,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, StripeMode::Live)
    }
}

/// All the settings the ledger engine needs to run.
///
/// Loaded once at startup, cloned and passed to services. Clone is
/// cheap because strings are reference-counted by the allocator's
/// small-string paths in practice, and these structs live for the
/// whole process lifetime anyway.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub stripe_mode: StripeMode,
    pub stripe_secret_key: String,
    /// `clientId` (live) or `sandboxId` (test) merchant id field name,
    /// selected by `stripe_mode` — see §6.
    pub stripe_client_id: String,
    pub stripe_sandbox_id: String,
    /// Baked into every idempotency key (§6, §8): `TEST_IDEMPOTENCY`.
    pub idempotency_tag: String,
    /// Below this many cents, the gateway refuses to charge a card and
    /// the small-residual absorber (§4.8) kicks in instead.
    pub gateway_min_charge_cents: i64,
}

impl Config {
    pub fn from_env() -> Self {
        let stripe_mode = StripeMode::from_env_str(
            &env::var("STRIPE_MODE").unwrap_or_else(|_| "test".to_string()),
        );

        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .unwrap_or(8081),

            database_url: env::var("DATABASE_URL").unwrap_or_default(),

            stripe_mode,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_client_id: env::var("STRIPE_CLIENT_ID").unwrap_or_default(),
            stripe_sandbox_id: env::var("STRIPE_SANDBOX_ID").unwrap_or_default(),

            idempotency_tag: env::var("TEST_IDEMPOTENCY").unwrap_or_else(|_| "dev".to_string()),

            gateway_min_charge_cents: env::var("GATEWAY_MIN_CHARGE_CENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
        }
    }

    /// The merchant id the gateway should route a charge/transfer to,
    /// per the live/test selector in §6.
    pub fn merchant_id(&self) -> &str {
        if self.stripe_mode.is_live() {
            &self.stripe_client_id
        } else {
            &self.stripe_sandbox_id
        }
    }
}
