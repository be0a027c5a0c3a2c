use std::fmt;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;

use crate::language::Language;

pub const DEFAULT_IMAGE_PREFIX: &str = "coursemology/";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_IMAGE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser, Debug)]
#[command(
    name = "evaluator",
    version,
    about,
    long_about = None,
    disable_help_flag = true
)]
pub struct CliArgs {
    /// Host of the grading service to connect to
    #[arg(short = 'h', long, env = "EVALUATOR_HOST")]
    pub host: String,

    /// API token of the evaluator user
    #[arg(
        short = 't',
        long = "api-token",
        env = "EVALUATOR_API_TOKEN",
        hide_env_values = true
    )]
    pub api_token: String,

    /// Email of the evaluator user
    #[arg(short = 'u', long = "api-user-email", env = "EVALUATOR_API_USER_EMAIL")]
    pub api_user_email: String,

    /// Time between two allocation requests, e.g. 10S or 1M30S
    #[arg(short = 'i', long = "interval", default_value = "10S")]
    pub poll_interval: String,

    /// Age after which evaluator containers are swept, e.g. 1D or 12H
    #[arg(short = 'l', long = "lifetime", default_value = "1D")]
    pub image_lifetime: String,

    /// Run a single allocation cycle, then exit
    #[arg(short = 'o', long = "one-shot", default_value_t = false)]
    pub one_shot: bool,

    /// Time to wait before the first allocation
    #[arg(short = 's', long = "sleep", default_value = "0S")]
    pub sleep_time: String,

    /// Upper bound on the run time of a single evaluation container
    #[arg(long = "timeout")]
    pub execution_timeout: Option<String>,

    /// Registry prefix prepended to evaluator image names
    #[arg(long = "image-prefix", default_value = DEFAULT_IMAGE_PREFIX)]
    pub image_prefix: String,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

impl CliArgs {
    /// Decode the raw arguments into an immutable configuration
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let host = self.host.trim_end_matches('/').to_string();
        if host.is_empty() {
            return Err(anyhow!("--host must not be empty"));
        }

        let poll_interval = parse_duration(&self.poll_interval, DurationContext::Time)
            .with_context(|| format!("invalid --interval {:?}", self.poll_interval))?;
        let image_lifetime = parse_duration(&self.image_lifetime, DurationContext::Date)
            .with_context(|| format!("invalid --lifetime {:?}", self.image_lifetime))?;
        let startup_delay = parse_duration(&self.sleep_time, DurationContext::Time)
            .with_context(|| format!("invalid --sleep {:?}", self.sleep_time))?;
        let execution_timeout = self
            .execution_timeout
            .as_deref()
            .map(|t| {
                parse_duration(t, DurationContext::Time)
                    .with_context(|| format!("invalid --timeout {t:?}"))
            })
            .transpose()?;

        Ok(Config {
            host,
            credentials: Credentials {
                user_email: self.api_user_email.clone(),
                token: self.api_token.clone(),
            },
            poll_interval,
            image_lifetime,
            one_shot: self.one_shot,
            startup_delay,
            execution_timeout,
            image_prefix: self.image_prefix.clone(),
        })
    }
}

/// Worker configuration, read-only for the lifetime of the process
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub credentials: Credentials,
    pub poll_interval: Duration,
    pub image_lifetime: Duration,
    pub one_shot: bool,
    pub startup_delay: Duration,
    pub execution_timeout: Option<Duration>,
    pub image_prefix: String,
}

impl Config {
    /// Configuration with default intervals for the given host
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            credentials,
            poll_interval: DEFAULT_POLL_INTERVAL,
            image_lifetime: DEFAULT_IMAGE_LIFETIME,
            one_shot: false,
            startup_delay: Duration::ZERO,
            execution_timeout: None,
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
        }
    }

    /// Fully qualified image name for the given language
    pub fn image_for(&self, language: Language) -> String {
        format!("{}{}", self.image_prefix, language.image())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_email: String,
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_email", &self.user_email)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// How a bare `M` designator is read: minutes in time context, months in
/// date context (before the `T` separator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationContext {
    Time,
    Date,
}

/// Decodes ISO 8601 style durations with the `P`/`PT` prefix optional,
/// e.g. `10S`, `1H30M`, `1D`, `PT10S`, `P1DT12H`.
pub fn parse_duration(input: &str, context: DurationContext) -> anyhow::Result<Duration> {
    let upper = input.trim().to_ascii_uppercase();
    let body = upper.strip_prefix('P').unwrap_or(&upper);

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => (date, time),
        None => match context {
            DurationContext::Time => ("", body),
            DurationContext::Date => (body, ""),
        },
    };
    if date_part.is_empty() && time_part.is_empty() {
        return Err(anyhow!("empty duration"));
    }

    // humantime reads `M` as months and `m` as minutes
    let date = date_part
        .chars()
        .map(|c| if c == 'M' { c } else { c.to_ascii_lowercase() });
    let time = time_part.chars().map(|c| c.to_ascii_lowercase());

    let mut rendered = String::with_capacity(body.len() * 2);
    let mut previous: Option<char> = None;
    for c in date.chain(std::iter::once(' ')).chain(time) {
        if c.is_ascii_digit() && previous.is_some_and(|p| p.is_ascii_alphabetic()) {
            rendered.push(' ');
        }
        rendered.push(c);
        previous = Some(c);
    }

    humantime::parse_duration(rendered.trim()).map_err(|e| anyhow!(e))
}
