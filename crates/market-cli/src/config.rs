//! Configuration loading and management

use std::path::Path;

use anyhow::{Context, Result, bail};
use market_sync::{
    CollectionConfig, InMemoryAuthProvider, InMemoryStore, ListingFields, Principal,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Main configuration for the CLI's local backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which collection holds listings and which field names the owner
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Accounts the local auth provider accepts. Stored in plaintext, so only
    /// ever list throwaway accounts for the in-memory backend here.
    #[serde(default = "default_accounts")]
    pub accounts: Vec<AccountSeed>,

    /// Listings the local store starts with
    #[serde(default = "default_listings")]
    pub listings: Vec<ListingSeed>,
}

/// A sign-in account for the local fake auth provider. Never real credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSeed {
    pub email: String,
    /// Plaintext password checked by the in-memory provider only
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Whether federated sign-in resolves to this account
    #[serde(default)]
    pub google: bool,
}

/// A listing as stored in `config.json`. Missing ids are assigned on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub seller_email: String,
    #[serde(flatten)]
    pub fields: ListingFields,
}

/// Demo account on the reserved `example.edu` domain.
fn default_accounts() -> Vec<AccountSeed> {
    vec![AccountSeed {
        email: "seller@example.edu".to_string(),
        password: "Passw0rd!".to_string(),
        display_name: Some("Demo Seller".to_string()),
        google: false,
    }]
}

fn default_listings() -> Vec<ListingSeed> {
    let seed = |id: &str, name: &str, quantity: u32, price: f64| ListingSeed {
        id: Some(id.to_string()),
        seller_email: "seller@example.edu".to_string(),
        fields: ListingFields {
            name: name.to_string(),
            category: "CSE".to_string(),
            quantity,
            available: quantity > 0,
            selling_price: price,
            cover_image: None,
        },
    };
    vec![
        seed("1", "Introduction to Algorithms", 2, 450.0),
        seed("2", "Calculus: Early Transcendentals", 0, 300.0),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: CollectionConfig::default(),
            accounts: default_accounts(),
            listings: default_listings(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &str) -> Result<Self> {
        let config_file = Path::new(config_path).join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();
            config.save(config_path)?;
            info!("Created default config at {:?}", config_file);
            Ok(config)
        }
    }

    /// Write the configuration to `<config_path>/config.json`
    pub fn save(&self, config_path: &str) -> Result<()> {
        let config_file = Path::new(config_path).join("config.json");

        std::fs::create_dir_all(config_path)
            .with_context(|| format!("Failed to create config directory: {}", config_path))?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_file, content)
            .with_context(|| format!("Failed to write config: {:?}", config_file))?;
        debug!("Saved configuration to {:?}", config_file);
        Ok(())
    }

    /// Build the local store from the seeded listings.
    ///
    /// Records are written under the configured owner field, the same way the
    /// mutation gateway stamps them.
    pub fn seed_store(&self) -> Result<InMemoryStore> {
        let store = InMemoryStore::new();
        for seed in &self.listings {
            let Value::Object(mut data) = serde_json::to_value(&seed.fields)? else {
                bail!("Listing {:?} did not serialize to an object", seed.fields.name);
            };
            data.insert(
                self.collection.owner_field.clone(),
                Value::String(seed.seller_email.clone()),
            );
            let id = seed
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            store.put(&self.collection.name, &id, data);
        }
        debug!(
            "Seeded {} listing(s) into {}",
            self.listings.len(),
            self.collection.name
        );
        Ok(store)
    }

    /// Build the local auth provider from the seeded accounts.
    pub fn seed_provider(&self) -> InMemoryAuthProvider {
        let provider = InMemoryAuthProvider::new();
        for account in &self.accounts {
            let principal = Principal {
                display_name: account.display_name.clone(),
                ..Principal::new(format!("local:{}", account.email), account.email.clone())
            };
            provider.add_account(principal, account.password.clone());
            if account.google {
                provider.set_google_account(Some(&account.email));
            }
        }
        provider
    }

    /// Replace the seeded listings with the store's current contents.
    pub fn sync_listings(&mut self, store: &InMemoryStore) {
        let owner_field = &self.collection.owner_field;
        self.listings = store
            .records(&self.collection.name)
            .into_iter()
            .filter_map(|record| {
                let mut data = record.data;
                let seller_email = match data.remove(owner_field) {
                    Some(Value::String(email)) => email,
                    _ => {
                        warn!("Record {} has no owner, not saving it", record.id);
                        return None;
                    }
                };
                match serde_json::from_value::<ListingFields>(Value::Object(data)) {
                    Ok(fields) => Some(ListingSeed {
                        id: Some(record.id),
                        seller_email,
                        fields,
                    }),
                    Err(e) => {
                        warn!("Record {} is malformed, not saving it: {}", record.id, e);
                        None
                    }
                }
            })
            .collect();
    }
}
