//! # Event Logger
//!
//! Subscribes to the [`EventBus`](super::EventBus) and writes every engine
//! event to the console (through `tracing`), to an append-only file, or to a
//! custom sink. Lines are plain text or structured JSON.
//!
//! ```no_run
//! use std::sync::Arc;
//! use psd2_sca::event::{EventBus, EventLogger, EventLoggerConfig, LogDestination};
//!
//! async fn example(bus: &EventBus) {
//!     let logger = EventLogger::new(EventLoggerConfig {
//!         destination: LogDestination::File {
//!             path: "/var/log/psd2/sca-events.log".to_string(),
//!         },
//!         structured: true,
//!         log_level: log::Level::Info,
//!     });
//!     bus.subscribe(Arc::new(logger)).await;
//! }
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::event::{EngineEvent, EventSubscriber};

/// Where event lines go
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogDestination {
    /// Through `tracing` at the configured level
    Console,

    /// Appended to a file
    File {
        /// Path to the log file
        path: String,
    },

    /// Custom logging function
    #[serde(skip)]
    Custom(Arc<dyn Fn(&str) + Send + Sync>),
}

impl fmt::Debug for LogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogDestination::Console => write!(f, "LogDestination::Console"),
            LogDestination::File { path } => f
                .debug_struct("LogDestination::File")
                .field("path", path)
                .finish(),
            LogDestination::Custom(_) => write!(f, "LogDestination::Custom(<function>)"),
        }
    }
}

/// Configuration for the event logger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLoggerConfig {
    /// Where to send the log output
    pub destination: LogDestination,

    /// Whether to use structured (JSON) logging
    #[serde(default)]
    pub structured: bool,

    /// The log level to use for console output
    pub log_level: log::Level,
}

impl Default for EventLoggerConfig {
    fn default() -> Self {
        Self {
            destination: LogDestination::Console,
            structured: false,
            log_level: log::Level::Info,
        }
    }
}

/// Writes engine events to the configured destination
pub struct EventLogger {
    config: EventLoggerConfig,
    file: Option<Arc<Mutex<File>>>,
}

impl EventLogger {
    /// Create a new event logger. A file that cannot be opened degrades to
    /// console output.
    pub fn new(config: EventLoggerConfig) -> Self {
        let file = match &config.destination {
            LogDestination::File { path } => match Self::open_log_file(path) {
                Ok(file) => Some(Arc::new(Mutex::new(file))),
                Err(err) => {
                    error!("Failed to open event log file {}: {}", path, err);
                    None
                }
            },
            _ => None,
        };

        Self { config, file }
    }

    fn open_log_file(path: &str) -> io::Result<File> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn log_event(&self, event: &EngineEvent) -> Result<()> {
        let line = if self.config.structured {
            self.format_structured_log(event)?
        } else {
            self.format_plain_log(event)
        };

        match &self.config.destination {
            LogDestination::Console => {
                match self.config.log_level {
                    log::Level::Error => error!("{}", line),
                    log::Level::Warn => warn!("{}", line),
                    log::Level::Info => info!("{}", line),
                    log::Level::Debug => debug!("{}", line),
                    log::Level::Trace => trace!("{}", line),
                }
                Ok(())
            }
            LogDestination::File { .. } => {
                let Some(file) = &self.file else {
                    error!("{}", line);
                    return Ok(());
                };
                let mut file_guard = file.lock().map_err(|_| {
                    Error::Configuration("Failed to acquire event log file lock".to_string())
                })?;
                writeln!(file_guard, "{}", line)?;
                file_guard.flush()?;
                Ok(())
            }
            LogDestination::Custom(func) => {
                func(&line);
                Ok(())
            }
        }
    }

    fn format_plain_log(&self, event: &EngineEvent) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");

        match event {
            EngineEvent::AuthorisationCreated {
                authorisation_id,
                parent_id,
                kind,
                status,
            } => format!(
                "[{}] AUTHORISATION CREATED: id={}, parent={}, kind={}, status={}",
                timestamp, authorisation_id, parent_id, kind, status
            ),
            EngineEvent::StatusChanged {
                authorisation_id,
                kind,
                from,
                to,
            } => format!(
                "[{}] SCA STATUS CHANGED: id={}, kind={}, {} -> {}",
                timestamp, authorisation_id, kind, from, to
            ),
            EngineEvent::ApproachForced {
                authorisation_id,
                previous,
            } => format!(
                "[{}] APPROACH FORCED TO DECOUPLED: id={}, previous={}",
                timestamp,
                authorisation_id,
                previous.map_or_else(|| "none".to_string(), |a| a.to_string())
            ),
            EngineEvent::HandoffIssued {
                authorisation_id,
                approach,
                ..
            } => format!(
                "[{}] HANDOFF ISSUED: id={}, approach={}",
                timestamp, authorisation_id, approach
            ),
            EngineEvent::ParentStatusChanged {
                authorisation_id,
                parent_id,
                status,
            } => format!(
                "[{}] PARENT STATUS CHANGED: id={}, parent={}, status={:?}",
                timestamp, authorisation_id, parent_id, status
            ),
        }
    }

    fn format_structured_log(&self, event: &EngineEvent) -> Result<String> {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "data": event,
        });
        Ok(serde_json::to_string(&entry)?)
    }
}

#[async_trait]
impl EventSubscriber for EventLogger {
    async fn handle_event(&self, event: EngineEvent) {
        if let Err(err) = self.log_event(&event) {
            error!("Failed to log engine event: {}", err);
        }
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogger")
            .field("config", &self.config)
            .field("file", &self.file.is_some())
            .finish()
    }
}
