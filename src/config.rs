use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use clap::builder::BoolishValueParser;
use clap::Args;
use tracing::info;

use crate::connectors::ews::EwsSettings;
use crate::connectors::graph_api::GraphCredentials;
use crate::connectors::pop3::{Pop3Settings, DEFAULT_POP3S_PORT};
use crate::connectors::{BackendKind, EwsConnector, GraphApiConnector, MailConnector, Pop3Connector};
use crate::db::Ledger;
use crate::error::{SyncError, SyncResult};
use crate::sync::{Deduplicator, FetchLimits, FolderSelection, SyncOptions};

pub const DEFAULT_SERVER: &str = "outlook.office365.com";
pub const ATTACHMENT_SUBDIR: &str = "pdf";

/// Sync settings. Every flag falls back to its environment variable.
#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    #[arg(long, env = "MAIL_BACKEND", default_value = "graph")]
    pub backend: BackendKind,

    #[arg(long, env = "EMAIL_ADDRESS")]
    pub email_address: Option<String>,

    #[arg(long, env = "EMAIL_PASSWORD", hide_env_values = true)]
    pub email_password: Option<String>,

    #[arg(long, env = "EMAIL_SERVER", default_value = DEFAULT_SERVER)]
    pub email_server: String,

    /// Server port (POP3 defaults to 995)
    #[arg(long, env = "EMAIL_PORT")]
    pub email_port: Option<u16>,

    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, env = "TENANT_ID")]
    pub tenant_id: Option<String>,

    /// Records kept per folder when not loading everything (0 = no cap)
    #[arg(long, env = "MAX_EMAILS", default_value_t = 100)]
    pub max_emails: usize,

    #[arg(long, env = "DAYS_BACK", default_value_t = 30)]
    pub days_back: u32,

    #[arg(long, env = "CHUNK_SIZE", default_value_t = 50)]
    pub chunk_size: usize,

    #[arg(long, env = "LOAD_ALL_EMAILS", default_value_t = true, action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub load_all_emails: bool,

    #[arg(long, env = "INCLUDE_FOLDERS", default_value_t = true, action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub include_folders: bool,

    #[arg(long, env = "INCLUDE_ARCHIVE", default_value_t = true, action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub include_archive: bool,

    /// Comma-separated allow-list of folder names
    #[arg(long, env = "FOLDER_NAMES", value_delimiter = ',')]
    pub folder_names: Vec<String>,

    /// Items fetched per folder (0 = unlimited)
    #[arg(long, env = "MAX_EMAILS_PER_FOLDER", default_value_t = 0)]
    pub max_emails_per_folder: usize,

    /// Page requests per folder before giving up
    #[arg(long, env = "MAX_PAGES", default_value_t = 1000)]
    pub max_pages: usize,

    #[arg(long, env = "MAIL_DIR", default_value = "mails")]
    pub mail_dir: PathBuf,

    /// Defaults to `<MAIL_DIR>/pdf`
    #[arg(long, env = "ATTACHMENT_DIR")]
    pub attachment_dir: Option<PathBuf>,

    #[arg(long, env = "PERSISTENT_DEDUP", default_value_t = true, action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub persistent_dedup: bool,

    /// Dedup ledger location (defaults to `<MAIL_DIR>/.mailpull.db`)
    #[arg(long)]
    pub ledger_path: Option<PathBuf>,

    /// Skip the persistent dedup ledger for this run
    #[arg(long, default_value_t = false)]
    pub no_ledger: bool,
}

#[derive(Debug, Clone)]
pub enum BackendSettings {
    Graph {
        mailbox: String,
        credentials: GraphCredentials,
    },
    Ews(EwsSettings),
    Pop3(Pop3Settings),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backend: BackendSettings,
    pub days_back: u32,
    pub limits: FetchLimits,
    pub selection: FolderSelection,
    pub mail_dir: PathBuf,
    pub attachment_dir: PathBuf,
    pub ledger_path: Option<PathBuf>,
}

impl SyncArgs {
    /// Resolve and validate. Fails with `SyncError::Config` before any
    /// network call.
    pub fn into_config(self) -> SyncResult<SyncConfig> {
        if self.chunk_size == 0 {
            return Err(SyncError::Config("CHUNK_SIZE must be at least 1".to_string()));
        }
        if self.max_pages == 0 {
            return Err(SyncError::Config("MAX_PAGES must be at least 1".to_string()));
        }

        let backend = match self.backend {
            BackendKind::Graph => BackendSettings::Graph {
                mailbox: required(self.email_address.as_deref(), "EMAIL_ADDRESS")?,
                credentials: GraphCredentials {
                    tenant_id: required(self.tenant_id.as_deref(), "TENANT_ID")?,
                    client_id: required(self.client_id.as_deref(), "CLIENT_ID")?,
                    client_secret: required(self.client_secret.as_deref(), "CLIENT_SECRET")?,
                },
            },
            BackendKind::Ews => BackendSettings::Ews(EwsSettings {
                endpoint: EwsSettings::endpoint_for_server(&required(
                    Some(self.email_server.as_str()),
                    "EMAIL_SERVER",
                )?),
                username: required(self.email_address.as_deref(), "EMAIL_ADDRESS")?,
                password: required(self.email_password.as_deref(), "EMAIL_PASSWORD")?,
            }),
            BackendKind::Pop3 => BackendSettings::Pop3(Pop3Settings {
                host: required(Some(self.email_server.as_str()), "EMAIL_SERVER")?,
                port: self.email_port.unwrap_or(DEFAULT_POP3S_PORT),
                username: required(self.email_address.as_deref(), "EMAIL_ADDRESS")?,
                password: required(self.email_password.as_deref(), "EMAIL_PASSWORD")?,
                max_messages: self.max_emails,
            }),
        };

        let attachment_dir = self
            .attachment_dir
            .unwrap_or_else(|| self.mail_dir.join(ATTACHMENT_SUBDIR));
        let ledger_path = (self.persistent_dedup && !self.no_ledger).then(|| {
            self.ledger_path
                .unwrap_or_else(|| Ledger::default_path(&self.mail_dir))
        });
        let folder_names = self
            .folder_names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(SyncConfig {
            backend,
            days_back: self.days_back,
            limits: FetchLimits {
                chunk_size: self.chunk_size,
                max_emails: self.max_emails,
                load_all: self.load_all_emails,
                max_per_folder: self.max_emails_per_folder,
                max_pages: self.max_pages,
            },
            selection: FolderSelection {
                include_other_folders: self.include_folders,
                include_archive: self.include_archive,
                explicit_names: folder_names,
            },
            mail_dir: self.mail_dir,
            attachment_dir,
            ledger_path,
        })
    }
}

impl SyncConfig {
    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            BackendSettings::Graph { .. } => BackendKind::Graph,
            BackendSettings::Ews(_) => BackendKind::Ews,
            BackendSettings::Pop3(_) => BackendKind::Pop3,
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days_back))
    }

    pub fn options(&self, now: DateTime<Utc>) -> SyncOptions {
        SyncOptions {
            since: self.since(now),
            limits: self.limits,
            selection: self.selection.clone(),
            mail_dir: self.mail_dir.clone(),
            attachment_dir: self.attachment_dir.clone(),
        }
    }

    pub fn connector(&self) -> SyncResult<Box<dyn MailConnector>> {
        Ok(match &self.backend {
            BackendSettings::Graph {
                mailbox,
                credentials,
            } => Box::new(GraphApiConnector::new(mailbox.clone(), credentials.clone())?),
            BackendSettings::Ews(settings) => Box::new(EwsConnector::new(settings.clone())?),
            BackendSettings::Pop3(settings) => Box::new(Pop3Connector::new(settings.clone())),
        })
    }

    pub fn deduplicator(&self) -> SyncResult<Deduplicator> {
        let Some(path) = &self.ledger_path else {
            return Ok(Deduplicator::new());
        };
        let ledger = Ledger::open(path)?;
        info!(path = %ledger.path().display(), "dedup ledger opened");
        Ok(Deduplicator::with_ledger(ledger))
    }
}

fn required(value: Option<&str>, name: &str) -> SyncResult<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::Config(format!("{name} is required")))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: SyncArgs,
    }

    fn parse(extra: &[&str]) -> SyncArgs {
        let mut argv = vec!["mailpull"];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).expect("parse args").args
    }

    #[test]
    fn graph_requires_oauth_settings() {
        let err = parse(&["--backend", "graph", "--email-address", "me@example.com"])
            .into_config()
            .expect_err("missing tenant");
        assert!(matches!(err, SyncError::Config(ref msg) if msg.contains("TENANT_ID")));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = parse(&["--backend", "pop3", "--chunk-size", "0"])
            .into_config()
            .expect_err("chunk size");
        assert!(err.is_fatal());
    }

    #[test]
    fn pop3_defaults_port_and_attachment_dir() {
        let config = parse(&[
            "--backend",
            "pop3",
            "--email-address",
            "me@example.com",
            "--email-password",
            "secret",
            "--email-server",
            "pop.example.com",
            "--mail-dir",
            "out",
            "--no-ledger",
        ])
        .into_config()
        .expect("config");

        let BackendSettings::Pop3(settings) = &config.backend else {
            panic!("expected pop3 settings");
        };
        assert_eq!(settings.port, DEFAULT_POP3S_PORT);
        assert_eq!(config.attachment_dir, PathBuf::from("out").join("pdf"));
        assert_eq!(config.ledger_path, None);
    }

    #[test]
    fn folder_names_are_split_and_trimmed() {
        let config = parse(&[
            "--backend",
            "ews",
            "--email-address",
            "me@example.com",
            "--email-password",
            "secret",
            "--folder-names",
            "Projects, Receipts,,",
            "--load-all-emails",
            "false",
        ])
        .into_config()
        .expect("config");

        assert_eq!(config.selection.explicit_names, vec!["Projects", "Receipts"]);
        assert!(!config.limits.load_all);
        assert_eq!(config.backend_kind(), BackendKind::Ews);
        assert_eq!(
            config.ledger_path,
            Some(PathBuf::from("mails").join(".mailpull.db"))
        );
    }
}
