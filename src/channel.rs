//! Single-slot shared command mailbox
//!
//! A fixed 1024-byte region acts as a mailbox between processes and a
//! running [`TankStore`](crate::store::TankStore). The first byte being zero
//! means "idle". A producer writes an ASCII comma-separated command followed
//! by a NUL terminator and then polls until the consumer clears the whole
//! buffer back to zero, which doubles as the acknowledgment.
//!
//! Stale bytes may linger past the terminator from a previous, longer
//! command; the consumer decodes only up to the first NUL.
//!
//! The channel holds at most one outstanding command. A second producer
//! writing before the first command is cleared will overwrite it — callers
//! that need stronger guarantees must serialize their producers.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::region::SharedRegion;
use crate::similarity::SimMethod;

/// Fixed mailbox size in bytes.
pub const CHANNEL_SIZE: usize = 1024;

/// Default channel region name.
pub const DEFAULT_CHANNEL_NAME: &str = "tankstore_comm";

/// Interval between acknowledgment checks on the producer side.
pub const SEND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default producer timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A command carried over the channel.
///
/// Wire format: `verb,field,...` terminated by a NUL byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `create,<name>,<dim>,<persist>,<capacity>,<meta_slot_size>,<metric>`
    Create {
        name: String,
        dim: usize,
        persist: bool,
        capacity: usize,
        meta_slot_size: usize,
        metric: SimMethod,
    },
    /// `save,<name>`
    Save { name: String },
    /// `log,<name>,<message>`
    Log { name: String, message: String },
}

impl Command {
    pub fn to_wire(&self) -> String {
        match self {
            Command::Create {
                name,
                dim,
                persist,
                capacity,
                meta_slot_size,
                metric,
            } => format!("create,{name},{dim},{persist},{capacity},{meta_slot_size},{metric}"),
            Command::Save { name } => format!("save,{name}"),
            Command::Log { name, message } => format!("log,{name},{message}"),
        }
    }

    /// Parse a decoded command line. Unknown verbs and malformed arity
    /// return `None`; the caller logs and drops them.
    pub fn parse(line: &str) -> Option<Command> {
        let verb = line.split(',').next()?.to_ascii_lowercase();
        match verb.as_str() {
            "create" => {
                let parts: Vec<&str> = line.split(',').collect();
                if parts.len() < 7 {
                    return None;
                }
                Some(Command::Create {
                    name: parts[1].to_string(),
                    dim: parts[2].parse().ok()?,
                    persist: match parts[3].to_ascii_lowercase().as_str() {
                        "true" => true,
                        "false" => false,
                        _ => return None,
                    },
                    capacity: parts[4].parse().ok()?,
                    meta_slot_size: parts[5].parse().ok()?,
                    metric: parts[6].parse().ok()?,
                })
            }
            "save" => {
                let parts: Vec<&str> = line.split(',').collect();
                if parts.len() != 2 {
                    return None;
                }
                Some(Command::Save {
                    name: parts[1].to_string(),
                })
            }
            "log" => {
                let mut parts = line.splitn(3, ',');
                parts.next();
                Some(Command::Log {
                    name: parts.next()?.to_string(),
                    message: parts.next()?.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Consumer-side handle on the mailbox region.
pub struct CommandChannel {
    region: SharedRegion,
}

impl CommandChannel {
    /// Attach to the mailbox if it exists, create it otherwise, then reset
    /// it to idle.
    pub fn attach_or_create(name: &str) -> Result<Self> {
        let region = SharedRegion::attach_or_create(name, CHANNEL_SIZE)?;
        let mut channel = Self { region };
        channel.acknowledge();
        Ok(channel)
    }

    /// Decode the pending command line, if any. Does not clear the slot.
    pub fn pending(&self) -> Option<String> {
        let raw = self.region.as_slice();
        if raw.first().copied().unwrap_or(0) == 0 {
            return None;
        }
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Clear the entire buffer to zero: completion signal and slot reset.
    pub fn acknowledge(&mut self) {
        self.region.as_mut_slice().fill(0);
    }

    pub fn release(&mut self) {
        self.region.release();
    }

    pub fn is_released(&self) -> bool {
        self.region.is_released()
    }

    /// Producer side: write `command` into the mailbox named `channel_name`
    /// and block (bounded polling) until the consumer clears the buffer.
    ///
    /// Returns `false` on a missing channel, an oversized command, or when
    /// the acknowledgment does not arrive within `timeout`. Never panics or
    /// errors on timeout.
    pub fn send(channel_name: &str, command: &Command, timeout: Duration) -> bool {
        let mut region = match SharedRegion::attach(channel_name) {
            Ok(region) => region,
            Err(e) => {
                tracing::error!("command channel '{}' not available: {}", channel_name, e);
                return false;
            }
        };

        let wire = command.to_wire();
        let bytes = wire.as_bytes();
        if bytes.len() + 1 > region.len() {
            tracing::error!("command too long for channel slot: {} bytes", bytes.len());
            return false;
        }

        let buf = region.as_mut_slice();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        tracing::debug!("sent command '{}', waiting for acknowledgment", wire);

        let start = Instant::now();
        while start.elapsed() < timeout {
            if region.as_slice().iter().all(|&b| b == 0) {
                return true;
            }
            std::thread::sleep(SEND_POLL_INTERVAL);
        }
        tracing::error!("no acknowledgment for '{}' within {:?}", wire, timeout);
        false
    }
}
