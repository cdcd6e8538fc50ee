//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `App` - An open session, the profile service and the local snapshot
//!   they persist to
//! - `cmd_init` - Create an empty snapshot
//! - `cmd_config` - Show the resolved configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use subwise_core::config::{default_config_path, Config, ENV_USER_ID};
use subwise_core::profile::ProfileService;
use subwise_core::remote::{BlobStore, MemoryStore, RemoteStore, RestStore};
use subwise_core::session::{Session, SessionOptions};

/// User id for the local snapshot when none is given
pub const LOCAL_USER: &str = "local";

/// Where the data lives
pub enum Target {
    /// JSON snapshot file driven by the in-memory backend
    Local(PathBuf),
    /// Hosted PostgREST-compatible backend from config
    Remote,
}

/// Pick the user id: flag, then config/env, then the local default
pub fn resolve_user(explicit: Option<&str>, config: &Config, remote: bool) -> Result<String> {
    if let Some(user) = explicit {
        return Ok(user.to_string());
    }
    if let Some(user) = &config.backend.user_id {
        return Ok(user.clone());
    }
    if remote {
        bail!("No user id for the hosted backend: pass --user or set {}", ENV_USER_ID);
    }
    Ok(LOCAL_USER.to_string())
}

/// A signed-in session and, in local mode, the snapshot to write back
pub struct App {
    pub session: Session,
    pub profiles: ProfileService,
    pub config: Config,
    snapshot: Option<(MemoryStore, PathBuf)>,
}

impl App {
    /// Sign in and wait for every collection to load
    ///
    /// `background` starts the notification trigger task (when enabled in
    /// config); one-shot commands run the engine explicitly instead.
    pub async fn open(target: Target, user: &str, config: Config, background: bool) -> Result<Self> {
        let mut options = SessionOptions::from(&config);
        options.notifications_enabled &= background;

        let (store, blobs, snapshot): (
            Arc<dyn RemoteStore>,
            Arc<dyn BlobStore>,
            Option<(MemoryStore, PathBuf)>,
        ) = match target {
            Target::Local(path) => {
                if !path.exists() {
                    bail!(
                        "Snapshot {} not found. Run: subwise init --snapshot {}",
                        path.display(),
                        path.display()
                    );
                }
                let memory = MemoryStore::load(&path)
                    .with_context(|| format!("Failed to read snapshot {}", path.display()))?
                    .with_bucket(config.storage.bucket.clone());
                let store: Arc<dyn RemoteStore> = Arc::new(memory.clone());
                let blobs: Arc<dyn BlobStore> = Arc::new(memory.clone());
                (store, blobs, Some((memory, path)))
            }
            Target::Remote => {
                let rest =
                    RestStore::from_config(&config).context("Failed to configure hosted backend")?;
                let store: Arc<dyn RemoteStore> = Arc::new(rest.clone());
                let blobs: Arc<dyn BlobStore> = Arc::new(rest);
                (store, blobs, None)
            }
        };

        let profiles = ProfileService::new(store.clone(), blobs, user, &config.storage);
        let session = Session::sign_in(store, user, options);
        session
            .wait_ready()
            .await
            .context("Failed to load subscriptions, categories and notifications")?;

        Ok(Self {
            session,
            profiles,
            config,
            snapshot,
        })
    }

    /// Write the local snapshot back to disk (no-op for the hosted backend)
    pub fn save(&self) -> Result<()> {
        if let Some((store, path)) = &self.snapshot {
            store
                .save(path)
                .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        }
        Ok(())
    }

    pub fn is_local(&self) -> bool {
        self.snapshot.is_some()
    }
}

pub fn cmd_init(snapshot: &Path) -> Result<()> {
    if snapshot.exists() {
        println!("Snapshot {} already exists", snapshot.display());
        return Ok(());
    }

    println!("🔧 Creating snapshot at {}...", snapshot.display());
    MemoryStore::new()
        .save(snapshot)
        .with_context(|| format!("Failed to create {}", snapshot.display()))?;

    println!("✅ Snapshot created!");
    println!();
    println!("Next steps:");
    println!("  1. Add a category: subwise categories add Streaming --budget 40");
    println!("  2. Add a subscription: subwise subscriptions add Netflix 15.49 --next 2024-07-01 --category Streaming");
    println!("  3. See the numbers: subwise summary");

    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else {
        "***".to_string()
    }
}

pub fn cmd_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let source = path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .filter(|p| p.exists());

    println!();
    println!("⚙️  Configuration");
    println!("   ─────────────────────────────────────────────────────────────");
    match source {
        Some(p) => println!("   File: {}", p.display()),
        None => println!("   File: (embedded defaults)"),
    }
    println!();
    println!("   [backend]");
    if config.has_backend() {
        println!("   url:            {}", config.backend.url);
    } else {
        println!("   url:            (not set, local mode only)");
    }
    println!("   api_key:        {}", mask(&config.backend.api_key));
    println!(
        "   access_token:   {}",
        mask(config.backend.access_token.as_deref().unwrap_or(""))
    );
    println!(
        "   user_id:        {}",
        config.backend.user_id.as_deref().unwrap_or("(not set)")
    );
    println!("   poll_interval:  {:?}", config.backend.poll_interval);
    println!();
    println!("   [dashboard]");
    println!(
        "   upcoming_window_days: {}",
        config.dashboard.upcoming_window_days
    );
    println!();
    println!("   [notifications]");
    println!("   enabled:             {}", config.notifications.enabled);
    println!(
        "   reevaluate_interval: {:?}",
        config.notifications.reevaluate_interval
    );
    println!();
    println!("   [storage]");
    println!("   bucket:              {}", config.storage.bucket);
    println!(
        "   signed_url_ttl_secs: {}",
        config.storage.signed_url_ttl_secs
    );
    println!(
        "   max_upload_attempts: {}",
        config.storage.max_upload_attempts
    );
    println!(
        "   retry_base_delay:    {:?}",
        config.storage.retry_base_delay
    );
    println!(
        "   max_picture_bytes:   {}",
        config.storage.max_picture_bytes
    );
    println!();

    Ok(())
}
