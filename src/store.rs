//! TankStore: tank registry, startup restore, and the command event loop
//!
//! One store runs per server process. At construction it restores every
//! complete persistence record found in its store directory, then spawns a
//! background thread polling the shared command channel so that sibling
//! processes without a handle on the store can still request tank creation,
//! saves, and log lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::channel::{Command, CommandChannel, DEFAULT_CHANNEL_NAME};
use crate::error::{Result, TankError};
use crate::registry::PARAMS_KEY;
use crate::snapshot;
use crate::tank::{Tank, TankConfig};

/// Interval between command-channel checks in the event loop. Command
/// latency is bounded by this, not by an OS wake signal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct TankStore {
    store_dir: PathBuf,
    channel_name: String,
    tanks: RwLock<HashMap<String, Arc<Tank>>>,
    channel: Mutex<CommandChannel>,
    stop_flag: Arc<AtomicBool>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl TankStore {
    /// Open a store: restore persisted tanks from `store_dir`, reset the
    /// command channel, and start the polling loop.
    pub fn open(store_dir: impl Into<PathBuf>, channel_name: Option<&str>) -> Result<Arc<Self>> {
        let store_dir = store_dir.into();
        std::fs::create_dir_all(&store_dir)?;
        let channel_name = channel_name.unwrap_or(DEFAULT_CHANNEL_NAME).to_string();

        let channel = CommandChannel::attach_or_create(&channel_name)?;

        let store = Arc::new(Self {
            store_dir,
            channel_name,
            tanks: RwLock::new(HashMap::new()),
            channel: Mutex::new(channel),
            stop_flag: Arc::new(AtomicBool::new(false)),
            poll_thread: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        store.restore_all();

        let loop_store = Arc::clone(&store);
        let handle = std::thread::Builder::new()
            .name("tankstore-poll".into())
            .spawn(move || loop_store.event_loop())?;
        *store.poll_thread.lock() = Some(handle);

        tracing::info!(
            "tank store ready: dir={:?}, channel='{}', tanks={}",
            store.store_dir,
            store.channel_name,
            store.tanks.read().len()
        );
        Ok(store)
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Create and register a new tank. Duplicate names are an error.
    pub fn create_tank(&self, config: TankConfig) -> Result<Arc<Tank>> {
        let mut tanks = self.tanks.write();
        if tanks.contains_key(&config.name) {
            return Err(TankError::DuplicateName(config.name));
        }
        let name = config.name.clone();
        let tank = Arc::new(Tank::create(config)?);
        tanks.insert(name.clone(), Arc::clone(&tank));
        tracing::info!("created tank '{}'", name);
        Ok(tank)
    }

    pub fn get_tank(&self, name: &str) -> Option<Arc<Tank>> {
        self.tanks.read().get(name).cloned()
    }

    pub fn tank_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tanks.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Persist one tank's record into the store directory.
    pub fn save_tank(&self, name: &str) -> Result<()> {
        let tank = self
            .get_tank(name)
            .ok_or_else(|| TankError::not_found(format!("tank '{name}'")))?;
        tank.save(&self.store_dir)
    }

    /// Remove a tank from the registry and release its regions.
    pub fn drop_tank(&self, name: &str) -> Result<()> {
        let tank = self
            .tanks
            .write()
            .remove(name)
            .ok_or_else(|| TankError::not_found(format!("tank '{name}'")))?;
        tank.close();
        Ok(())
    }

    /// Restore every complete persistence record in the store directory.
    /// A failure for one tank is logged and skipped, never fatal.
    fn restore_all(&self) {
        let names = match snapshot::scan_records(&self.store_dir) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("could not scan store dir {:?}: {}", self.store_dir, e);
                return;
            }
        };

        for name in names {
            match self.restore_tank(&name) {
                Ok(tank) => {
                    tracing::info!("restored {}", tank);
                    self.tanks.write().insert(name, tank);
                }
                Err(e) => {
                    tracing::warn!("failed to restore tank '{}': {}", name, e);
                }
            }
        }
    }

    /// Rebuild one tank from its record: shape from the snapshot's `params`
    /// entry, then replay the metadata blob and the vector rows.
    fn restore_tank(&self, name: &str) -> Result<Arc<Tank>> {
        let image = snapshot::read_metadata(&snapshot::metadata_path(&self.store_dir, name))?;
        let params = image
            .entries
            .get(PARAMS_KEY)
            .ok_or_else(|| TankError::Format(format!("snapshot for '{name}' has no params")))?;
        let config: TankConfig = serde_json::from_value(params.clone())?;

        let tank = Tank::create(config)?;
        if let Err(e) = tank.load(&self.store_dir) {
            // do not leave orphaned regions behind a failed restore
            tank.close();
            return Err(e);
        }
        Ok(Arc::new(tank))
    }

    /// The background polling loop: consume one command at a time, dispatch
    /// it, and clear the whole buffer as the acknowledgment.
    fn event_loop(&self) {
        tracing::debug!("tank store event loop started");
        while !self.stop_flag.load(Ordering::Relaxed) {
            let pending = self.channel.lock().pending();
            if let Some(line) = pending {
                tracing::debug!("received command: {}", line);
                match Command::parse(&line) {
                    Some(command) => self.dispatch(command),
                    None => tracing::warn!("ignoring malformed command: {}", line),
                }
                self.channel.lock().acknowledge();
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        tracing::debug!("tank store event loop stopped");
    }

    fn dispatch(&self, command: Command) {
        match command {
            Command::Create {
                name,
                dim,
                persist,
                capacity,
                meta_slot_size,
                metric,
            } => {
                if self.get_tank(&name).is_some() {
                    tracing::debug!("tank '{}' already exists", name);
                    return;
                }
                let config = TankConfig::new(name.clone(), dim)
                    .capacity(capacity)
                    .meta_slot_size(meta_slot_size)
                    .metric(metric)
                    .persist(persist);
                if let Err(e) = self.create_tank(config) {
                    tracing::error!("create command for '{}' failed: {}", name, e);
                }
            }
            Command::Save { name } => match self.save_tank(&name) {
                Ok(()) => tracing::info!("tank '{}' saved to {:?}", name, self.store_dir),
                Err(e) => tracing::error!("save command for '{}' failed: {}", name, e),
            },
            Command::Log { name, message } => match self.get_tank(&name) {
                Some(tank) => {
                    if let Err(e) = tank.refresh() {
                        tracing::warn!("could not refresh tank '{}': {}", name, e);
                    }
                    tracing::info!("{}: {}", tank, message);
                }
                None => tracing::error!("log command for unknown tank '{}'", name),
            },
        }
    }

    /// Stop the event loop, join it, and release every shared region (each
    /// tank's pair, then the command channel). Calling stop twice is a
    /// no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.poll_thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("tank store event loop panicked");
            }
        }
        for tank in self.tanks.read().values() {
            tank.close();
        }
        self.channel.lock().release();
    }
}

impl Drop for TankStore {
    fn drop(&mut self) {
        // the polling thread holds its own Arc, so by the time this runs the
        // loop has already exited; this only covers a store that was never
        // explicitly stopped
        self.stop();
    }
}
