use anyhow::Result;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::ChatId;
use crate::parse::{parse_address, parse_eth_to_wei, ParseError};
use crate::subscriptions::SubscriptionStore;

const DEFAULT_ETH_WS_URL: &str = "ws://localhost:8546";
const DEFAULT_WORKERS: usize = 8;
const DEFAULT_TASKS_BUFFER: usize = 4096;
const DEFAULT_NOTIFY_BUFFER: usize = 4096;

#[derive(Debug, Clone)]
pub struct Config {
    pub eth_ws_url: String,
    pub database_url: String,
    pub watcher_workers: usize,
    pub tasks_buffer: usize,
    pub notify_buffer: usize,
    pub subscribers_file: PathBuf,
}

fn positive_or(value: Option<String>, default: usize) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(Self::from_vars(|key| std::env::var(key).ok()))
    }

    fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Config {
            eth_ws_url: var("ETH_WS_URL").unwrap_or_else(|| DEFAULT_ETH_WS_URL.to_string()),
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:./scanblock.db".to_string()),
            watcher_workers: positive_or(var("WATCHER_WORKERS"), DEFAULT_WORKERS),
            tasks_buffer: positive_or(var("TASKS_BUFFER"), DEFAULT_TASKS_BUFFER),
            notify_buffer: positive_or(var("NOTIFY_BUFFER"), DEFAULT_NOTIFY_BUFFER),
            subscribers_file: var("SUBSCRIBERS_FILE")
                .unwrap_or_else(|| "subscribers.toml".to_string())
                .into(),
        }
    }
}

/// One `[[subscribers]]` entry of the seed file. Values are kept as text until
/// they pass validation.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberSeed {
    pub chat_id: ChatId,
    pub wallet: Option<String>,
    pub min_value_eth: Option<String>,
}

impl SubscriberSeed {
    /// Validates both criteria before touching the store, so a bad entry changes nothing.
    /// Criteria missing from the entry are cleared.
    pub fn apply(&self, store: &SubscriptionStore) -> Result<(), ParseError> {
        let wallet = self.wallet.as_deref().map(parse_address).transpose()?;
        let min_wei = self.min_value_eth.as_deref().map(parse_eth_to_wei).transpose()?;
        let before = store.get_copy(self.chat_id);

        // set before clearing so a subscriber that keeps one criterion never disappears mid-update
        if wallet.is_some() {
            store.set_wallet(self.chat_id, wallet);
        }
        if min_wei.is_some() {
            store.set_large_tx_min(self.chat_id, min_wei);
        }
        if wallet.is_none() {
            store.clear_wallet(self.chat_id);
        }
        if min_wei.is_none() {
            store.clear_large_tx(self.chat_id);
        }

        let after = store.get_copy(self.chat_id);
        if before != after {
            debug!("Subscriber {}: {:?} -> {:?}", self.chat_id, before, after);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct SubscribersFile {
    #[serde(default)]
    subscribers: Vec<SubscriberSeed>,
}

/// Reads the seed file. A missing file yields no subscribers.
pub fn load_subscribers(path: &Path) -> Result<Vec<SubscriberSeed>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
        .build()?;
    let file: SubscribersFile = settings.try_deserialize()?;
    Ok(file.subscribers)
}

/// Applies every valid seed and returns how many were accepted.
pub fn seed_subscriptions(store: &SubscriptionStore, seeds: &[SubscriberSeed]) -> usize {
    let mut applied = 0;
    for seed in seeds {
        match seed.apply(store) {
            Ok(()) => applied += 1,
            Err(e) => warn!("Skipping subscriber {}: {}", seed.chat_id, e),
        }
    }
    applied
}

/// Makes the registry mirror `seeds`. Subscribers absent from the seeds are
/// removed; an invalid seed leaves its subscriber's current criteria in place.
pub fn sync_subscriptions(store: &SubscriptionStore, seeds: &[SubscriberSeed]) -> usize {
    let listed: HashSet<ChatId> = seeds.iter().map(|seed| seed.chat_id).collect();
    for chat_id in store.chat_ids() {
        if !listed.contains(&chat_id) {
            store.clear_all(chat_id);
        }
    }
    seed_subscriptions(store, seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::{Address, U256};
    use std::io::Write;

    #[test]
    fn numeric_settings_fall_back_on_bad_values() {
        assert_eq!(positive_or(Some("16".to_string()), 8), 16);
        assert_eq!(positive_or(Some("0".to_string()), 8), 8);
        assert_eq!(positive_or(Some("-3".to_string()), 8), 8);
        assert_eq!(positive_or(Some("many".to_string()), 8), 8);
        assert_eq!(positive_or(None, 8), 8);
    }

    #[test]
    fn unset_variables_use_defaults() {
        let config = Config::from_vars(|_| None);
        assert_eq!(config.eth_ws_url, "ws://localhost:8546");
        assert_eq!(config.database_url, "sqlite:./scanblock.db");
        assert_eq!(config.watcher_workers, 8);
        assert_eq!(config.tasks_buffer, 4096);
        assert_eq!(config.notify_buffer, 4096);
        assert_eq!(config.subscribers_file, PathBuf::from("subscribers.toml"));
    }

    #[test]
    fn variables_override_defaults() {
        let config = Config::from_vars(|key| match key {
            "ETH_WS_URL" => Some("wss://node.example:8546".to_string()),
            "WATCHER_WORKERS" => Some("2".to_string()),
            "TASKS_BUFFER" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.eth_ws_url, "wss://node.example:8546");
        assert_eq!(config.watcher_workers, 2);
        assert_eq!(config.tasks_buffer, 4096);
    }

    #[test]
    fn missing_seed_file_means_no_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = load_subscribers(&dir.path().join("absent.toml")).unwrap();
        assert!(seeds.is_empty());
    }

    #[test]
    fn loads_and_applies_seed_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[[subscribers]]
chat_id = 1
wallet = "0x{wallet}"

[[subscribers]]
chat_id = 2
min_value_eth = "1,5"

[[subscribers]]
chat_id = 3
wallet = "not-an-address"
min_value_eth = "2"

[[subscribers]]
chat_id = 4
min_value_eth = "0"
"#,
            wallet = "aa".repeat(20)
        )
        .unwrap();

        let seeds = load_subscribers(file.path()).unwrap();
        assert_eq!(seeds.len(), 4);

        let store = SubscriptionStore::new();
        assert_eq!(seed_subscriptions(&store, &seeds), 2);

        assert_eq!(store.get_copy(1).unwrap().wallet, Some(Address::repeat_byte(0xaa)));
        assert_eq!(
            store.get_copy(2).unwrap().large_tx_min_wei,
            Some(U256::exp10(18) * U256::from(3) / U256::from(2))
        );
        assert!(store.get_copy(3).is_none());
        assert!(store.get_copy(4).is_none());
    }

    fn seed(chat_id: ChatId, wallet: Option<&str>, min_value_eth: Option<&str>) -> SubscriberSeed {
        SubscriberSeed {
            chat_id,
            wallet: wallet.map(str::to_string),
            min_value_eth: min_value_eth.map(str::to_string),
        }
    }

    #[test]
    fn reapplying_a_seed_clears_dropped_criteria() {
        let store = SubscriptionStore::new();
        let wallet = format!("0x{}", "aa".repeat(20));
        seed(1, Some(&wallet), Some("2")).apply(&store).unwrap();

        seed(1, None, Some("3")).apply(&store).unwrap();
        let subs = store.get_copy(1).unwrap();
        assert_eq!(subs.wallet, None);
        assert_eq!(subs.large_tx_min_wei, Some(U256::exp10(18) * U256::from(3)));

        seed(1, None, None).apply(&store).unwrap();
        assert!(store.get_copy(1).is_none());
    }

    #[test]
    fn sync_removes_unlisted_and_keeps_invalid_subscribers() {
        let store = SubscriptionStore::new();
        let wallet = format!("0x{}", "bb".repeat(20));
        seed_subscriptions(
            &store,
            &[seed(1, None, Some("1")), seed(2, Some(&wallet), None), seed(3, None, Some("5"))],
        );

        let applied = sync_subscriptions(&store, &[seed(2, Some("0x12"), None), seed(4, None, Some("0,5"))]);
        assert_eq!(applied, 1);

        let mut ids = store.chat_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(store.get_copy(2).unwrap().wallet, Some(Address::repeat_byte(0xbb)));
        assert_eq!(
            store.get_copy(4).unwrap().large_tx_min_wei,
            Some(U256::exp10(18) / U256::from(2))
        );
    }
}
