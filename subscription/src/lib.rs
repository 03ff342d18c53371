//! Remote server lists and the snapshot handed to the template renderer.

mod process;

pub use process::{deduplicate, unique_tags, OutboundProcessor};

use std::io::Read;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use config::outbound::{
    Outbound, OutboundOptions, SelectorOutboundOptions, URLTestOutboundOptions,
};
use config::SubscriptionOptions;
use serde_json::Value;

pub const DEFAULT_USER_AGENT: &str = "boxgen";
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Servers of one subscription together with its grouping preferences.
#[derive(Clone, Debug, PartialEq)]
pub struct Subscription {
    pub name: String,
    pub generate_selector: bool,
    pub generate_urltest: bool,
    pub urltest_suffix: Option<String>,
    pub custom_selector: Option<SelectorOutboundOptions>,
    pub custom_urltest: Option<URLTestOutboundOptions>,
    pub servers: Vec<Outbound>,
    pub updated_at: SystemTime,
}

impl Subscription {
    pub fn new(options: &SubscriptionOptions, servers: Vec<Outbound>) -> Self {
        Subscription {
            name: options.name.clone(),
            generate_selector: options.generate_selector,
            generate_urltest: options.generate_urltest,
            urltest_suffix: options.urltest_suffix.clone(),
            custom_selector: options.custom_selector.clone(),
            custom_urltest: options.custom_urltest.clone(),
            servers,
            updated_at: SystemTime::now(),
        }
    }

    /// Downloads and processes the subscription, retrying failed requests.
    pub fn fetch(options: &SubscriptionOptions) -> Result<Self> {
        let url = url::Url::parse(&options.url)
            .with_context(|| format!("subscription {}: invalid url", options.name))?;
        let user_agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let mut last_error = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match download(&url, user_agent) {
                Ok(body) => {
                    let subscription = Subscription::from_document(options, &body)?;
                    tracing::info!(
                        subscription = %options.name,
                        servers = subscription.servers.len(),
                        "subscription updated"
                    );
                    return Ok(subscription);
                }
                Err(e) => {
                    tracing::warn!(
                        subscription = %options.name,
                        attempt,
                        "fetch subscription failed: {e:#}"
                    );
                    last_error = Some(e);
                    if attempt < FETCH_ATTEMPTS {
                        thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| anyhow!("no attempt made"))
            .context(format!("fetch subscription {}", options.name)))
    }

    /// Builds a snapshot from an engine configuration document.
    pub fn from_document(options: &SubscriptionOptions, body: &[u8]) -> Result<Self> {
        let servers = parse_servers(body)
            .with_context(|| format!("parse subscription {}", options.name))?;
        let servers = process(options, servers)?;
        Ok(Subscription::new(options, servers))
    }

    pub fn server_tags(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|it| it.tag.as_str())
    }
}

fn download(url: &url::Url, user_agent: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    ureq::get(url.as_str())
        .set("User-Agent", user_agent)
        .timeout(FETCH_TIMEOUT)
        .call()
        .with_context(|| format!("request {url}"))?
        .into_reader()
        .read_to_end(&mut data)
        .context("read response body")?;
    Ok(data)
}

/// Server outbounds of an engine configuration document. Groups and the
/// built-in outbounds carry no server and are left out.
fn parse_servers(body: &[u8]) -> Result<Vec<Outbound>> {
    let document: Value = serde_json::from_slice(body).context("decode json")?;
    let Some(Value::Array(outbounds)) = document.get("outbounds") else {
        bail!("missing outbounds");
    };
    let mut servers = Vec::with_capacity(outbounds.len());
    for (i, raw) in outbounds.iter().enumerate() {
        let outbound: Outbound = match serde_json::from_value(raw.clone()) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::warn!("skip invalid outbound[{i}]: {e}");
                continue;
            }
        };
        if matches!(outbound.options, OutboundOptions::Other { .. }) && !outbound.tag.is_empty() {
            servers.push(outbound);
        }
    }
    Ok(servers)
}

fn process(options: &SubscriptionOptions, mut servers: Vec<Outbound>) -> Result<Vec<Outbound>> {
    for (i, process) in options.process.iter().enumerate() {
        let processor =
            OutboundProcessor::new(process).with_context(|| format!("process[{i}]"))?;
        servers = processor.process(servers);
    }
    if options.deduplication {
        servers = deduplicate(servers);
    }
    unique_tags(&mut servers);
    Ok(servers)
}
