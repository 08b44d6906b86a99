use std::{fmt, time::Duration};

use url::Url;

use crate::{error::RelayError, event::{ContentKind, NormalizedEvent}};

pub const MIN_RECONNECT_DELAY_MS: u64 = 1_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_INFLIGHT_RECEIPTS: usize = 32;

/// Content filters. Each flag drops events carrying that class of content.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FilterFlags {
    pub ignore_messages: bool,
    pub ignore_attachments: bool,
    pub ignore_reactions: bool,
}

impl FilterFlags {
    /// The first content class that causes `event` to be dropped, if any.
    pub fn rejects(&self, event: &NormalizedEvent) -> Option<ContentKind> {
        [
            (self.ignore_messages, ContentKind::Message),
            (self.ignore_attachments, ContentKind::Attachment),
            (self.ignore_reactions, ContentKind::Reaction),
        ]
        .into_iter()
        .find(|(ignored, kind)| *ignored && event.contains(*kind))
        .map(|(_, kind)| kind)
    }
}

/// Everything a [`Relay`](crate::relay::Relay) needs, checked by
/// [`RelayConfig::validate`] before any connection is attempted.
#[derive(Clone)]
pub struct RelayConfig {
    /// Base address of the REST service, e.g. `http://localhost:8080`.
    pub api_url: Url,
    /// Registered account (phone number) whose stream is relayed.
    pub account: String,
    pub auth_token: Option<String>,
    pub reconnect_delay: Duration,
    pub filters: FilterFlags,
    pub mark_as_read: bool,
    pub receipt_timeout: Duration,
    pub max_inflight_receipts: usize,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("api_url", &self.api_url.as_str())
            .field("account", &self.account)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("reconnect_delay", &self.reconnect_delay)
            .field("filters", &self.filters)
            .field("mark_as_read", &self.mark_as_read)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("max_inflight_receipts", &self.max_inflight_receipts)
            .finish()
    }
}

impl RelayConfig {
    pub fn new(api_url: &str, account: impl Into<String>) -> Result<Self, RelayError> {
        Ok(RelayConfig {
            api_url: Url::parse(api_url)?,
            account: account.into(),
            auth_token: None,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            filters: FilterFlags::default(),
            mark_as_read: false,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            max_inflight_receipts: DEFAULT_MAX_INFLIGHT_RECEIPTS,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn with_filters(mut self, filters: FilterFlags) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_mark_as_read(mut self, mark_as_read: bool) -> Self {
        self.mark_as_read = mark_as_read;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.account.trim().is_empty() {
            return Err(RelayError::Config("account must not be empty".into()));
        }
        if !matches!(self.api_url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(RelayError::Config(format!(
                "unsupported api url scheme `{}`",
                self.api_url.scheme()
            )));
        }
        if self.api_url.host_str().is_none() {
            return Err(RelayError::Config("api url has no host".into()));
        }
        let delay_ms = self.reconnect_delay.as_millis();
        if delay_ms < MIN_RECONNECT_DELAY_MS as u128 || delay_ms > MAX_RECONNECT_DELAY_MS as u128 {
            return Err(RelayError::Config(format!(
                "reconnect delay must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS} ms, got {delay_ms}"
            )));
        }
        if self.auth_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(RelayError::Config("auth token is set but empty".into()));
        }
        if self.receipt_timeout.is_zero() || self.receipt_timeout > MAX_RECEIPT_TIMEOUT {
            return Err(RelayError::Config(format!(
                "receipt timeout must be between 1 ms and {} s",
                MAX_RECEIPT_TIMEOUT.as_secs()
            )));
        }
        if self.max_inflight_receipts == 0 {
            return Err(RelayError::Config("max in-flight receipts must be at least 1".into()));
        }
        Ok(())
    }

    /// `ws(s)://<host>/v1/receive/<account>`
    pub fn stream_url(&self) -> Result<Url, RelayError> {
        self.endpoint(
            |scheme| match scheme {
                "http" | "ws" => Some("ws"),
                "https" | "wss" => Some("wss"),
                _ => None,
            },
            "receive",
        )
    }

    /// `http(s)://<host>/v1/receipts/<account>`
    pub fn receipt_url(&self) -> Result<Url, RelayError> {
        self.endpoint(
            |scheme| match scheme {
                "http" | "ws" => Some("http"),
                "https" | "wss" => Some("https"),
                _ => None,
            },
            "receipts",
        )
    }

    fn endpoint(
        &self,
        scheme_for: fn(&str) -> Option<&'static str>,
        resource: &str,
    ) -> Result<Url, RelayError> {
        let mut url = self.api_url.clone();
        let scheme = scheme_for(url.scheme()).ok_or_else(|| {
            RelayError::Config(format!("unsupported api url scheme `{}`", url.scheme()))
        })?;
        url.set_scheme(scheme)
            .map_err(|_| RelayError::Config(format!("cannot switch api url to `{scheme}`")))?;
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RelayError::Config("api url cannot be a base".into()))?;
            segments
                .pop_if_empty()
                .extend(["v1", resource, self.account.trim()]);
        }
        Ok(url)
    }
}
