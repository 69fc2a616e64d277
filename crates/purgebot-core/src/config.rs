use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{deleter::DeletePolicy, errors::Error, Result};

/// Largest number of ids one delete request may carry on the platform.
pub const MAX_DELETE_BATCH: usize = 100;

/// Typed configuration, read once at startup.
///
/// Personal-account api credentials are deliberately absent: every user-mode
/// run supplies its own.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub allowed_users: Vec<i64>,

    // Flows
    pub cooldown: Duration,
    pub user_flow_timeout: Duration,
    pub admin_flow_timeout: Duration,

    // Deletion pacing
    pub delete_batch_size: usize,
    pub delete_batch_delay: Duration,
    pub delete_range_delay: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `load` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let allowed_users = parse_csv_i64(get("PURGEBOT_ALLOWED_USERS"));
        if allowed_users.is_empty() {
            return Err(Error::Config(
                "PURGEBOT_ALLOWED_USERS environment variable is required".to_string(),
            ));
        }

        let secs = |key: &str, default: u64| {
            Duration::from_secs(parse_u64(get(key)).unwrap_or(default))
        };
        let millis = |key: &str, default: u64| {
            Duration::from_millis(parse_u64(get(key)).unwrap_or(default))
        };

        let cooldown = secs("COOLDOWN_SECS", 30);
        let user_flow_timeout = secs("USER_FLOW_TIMEOUT_SECS", 600);
        let admin_flow_timeout = secs("ADMIN_FLOW_TIMEOUT_SECS", 300);

        let delete_batch_size = parse_u64(get("DELETE_BATCH_SIZE"))
            .map(|n| n as usize)
            .unwrap_or(MAX_DELETE_BATCH)
            .clamp(1, MAX_DELETE_BATCH);
        let delete_batch_delay = millis("DELETE_BATCH_DELAY_MS", 1000);
        let delete_range_delay = millis("DELETE_RANGE_DELAY_MS", 100);

        let audit_log_path = PathBuf::from(
            get("AUDIT_LOG_PATH").unwrap_or("/tmp/purgebot-audit.log".to_string()),
        );
        let audit_log_json = parse_bool(get("AUDIT_LOG_JSON")).unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            allowed_users,
            cooldown,
            user_flow_timeout,
            admin_flow_timeout,
            delete_batch_size,
            delete_batch_delay,
            delete_range_delay,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy {
            batch_size: self.delete_batch_size,
            batch_delay: self.delete_batch_delay,
            range_delay: self.delete_range_delay,
            permanent: true,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}
