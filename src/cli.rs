// src/cli.rs

use crate::config::AppConfig;
use crate::ldap::LdapDirectory;
use crate::models::LocalGroup;
use crate::raddb::RadDB;
use crate::store::{RadDbStore, RecordStore};
use crate::sync::{DirectorySyncEngine, SyncError, SyncOptions};
use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

// === CLI ===

#[derive(Parser)]
#[command(name = "dirsync", author, version)]
#[command(about = "Синхронизация пользователей каталога в локальное хранилище", long_about = None)]
pub struct Cli {
    /// Файл конфигурации (по умолчанию <config dir>/dirsync/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Создать конфиг по умолчанию с новым мастер-ключом
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Синхронизировать всех пользователей по фильтру
    Sync {
        /// Удалить локальные записи, чьих GUID больше нет в каталоге
        #[arg(long)]
        destructive: bool,
    },
    /// Синхронизировать одного пользователя по email
    SyncOne {
        #[arg(long)]
        email: String,
        /// Вывести запись каталога в JSON
        #[arg(short, long)]
        verbose: bool,
    },
    /// Привязать локальные записи к пользователям каталога по email
    Migrate,
    /// Управление локальными группами
    Groups {
        #[command(subcommand)]
        cmd: GroupCommand,
    },
    /// Список сохранённых записей
    Records {
        #[arg(short, long)]
        json: bool,
    },
}

#[derive(clap::Subcommand)]
pub enum GroupCommand {
    Add { code: String, title: String },
    Show { code: String },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AppConfig::default_path)
    }
}

// === Точка входа ===

pub async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let path = cli.config_path();

    match cli.command {
        Command::Init { force } => init(path, force)?,
        Command::Sync { destructive } => {
            let config = load_config(&path, true)?;
            handle_sync(&config, destructive).await?
        }
        Command::SyncOne { email, verbose } => {
            let config = load_config(&path, true)?;
            handle_sync_one(&config, &email, verbose).await?
        }
        Command::Migrate => handle_migrate(&load_config(&path, true)?).await?,
        Command::Groups { cmd } => {
            let config = load_config(&path, false)?;
            handle_groups(cmd, &open_store(&config)?).await?
        }
        Command::Records { json } => {
            let config = load_config(&path, false)?;
            handle_records(json, &open_store(&config)?).await?
        }
    }

    Ok(())
}

/// Загрузить конфиг, применить переменные окружения, включить логи
fn load_config(path: &Path, for_sync: bool) -> Result<AppConfig, Box<dyn Error>> {
    let mut config = AppConfig::load(path)?;
    config.apply_env_overrides();
    crate::init_logging(&config.logging);
    if for_sync {
        config.validate()?;
    }
    Ok(config)
}

fn init(path: PathBuf, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        eprintln!("❌ {} уже существует (--force для перезаписи)", path.display());
        return Err("config already exists".into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut config = AppConfig::default();
    config.store.master_key_hex = hex::encode(RadDB::generate_key());
    config.save(&path)?;

    println!("✅ Конфиг создан: {}", path.display());
    println!("   Перед синхронизацией заполните ldap.url, ldap.bind_dn и ldap.base_dn");
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<RadDbStore, Box<dyn Error>> {
    let key = config.master_key()?;
    Ok(RadDbStore::open(&config.store.db_path, &key)?)
}

async fn connect(config: &AppConfig) -> Result<LdapDirectory, Box<dyn Error>> {
    Ok(LdapDirectory::connect(&config.ldap, &config.sync.guid_attribute).await?)
}

async fn disconnect(connection: LdapDirectory) {
    if let Err(e) = connection.unbind().await {
        warn!(error = %e, "unbind failed");
    }
}

/// Токен, отменяемый по первому Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current entry");
            child.cancel();
        }
    });
    token
}

// === Обработчики ===

async fn handle_sync(config: &AppConfig, destructive: bool) -> Result<(), Box<dyn Error>> {
    let mut options = SyncOptions::from_config(config);
    options.destructive |= destructive;

    let store = open_store(config)?;
    let connection = connect(config).await?;
    let mut engine =
        DirectorySyncEngine::new(connection, store, options).with_cancellation(interrupt_token());

    let result = engine.sync_all().await;
    let (connection, _) = engine.into_parts();
    disconnect(connection).await;

    let report = result?;
    println!("✅ {report}");
    if report.failed > 0 || report.group_failures > 0 {
        println!(
            "⚠️  Ошибок записей: {}, ошибок групп: {} (см. лог)",
            report.failed, report.group_failures
        );
    }
    if report.cancelled {
        println!("⚠️  Синхронизация прервана, записи не удалялись");
    }
    Ok(())
}

async fn handle_sync_one(
    config: &AppConfig,
    email: &str,
    verbose: bool,
) -> Result<(), Box<dyn Error>> {
    let store = open_store(config)?;
    let connection = connect(config).await?;
    let mut engine = DirectorySyncEngine::new(connection, store, SyncOptions::from_config(config));

    let result = engine.sync_one(email).await;
    let (connection, _) = engine.into_parts();
    disconnect(connection).await;

    match result {
        Ok(synced) => {
            if verbose {
                println!("{}", serde_json::to_string_pretty(&synced.entry)?);
            }
            println!(
                "✅ Синхронизирован {} ({:?}, запись {})",
                synced.entry.dn(),
                synced.outcome,
                synced.record.id
            );
            Ok(())
        }
        Err(e @ (SyncError::NotFound(_) | SyncError::MissingEmail)) => {
            eprintln!("❌ {e}");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_migrate(config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let store = open_store(config)?;
    let connection = connect(config).await?;
    let mut engine = DirectorySyncEngine::new(connection, store, SyncOptions::from_config(config))
        .with_cancellation(interrupt_token());

    let result = engine.migrate_existing().await;
    let (connection, _) = engine.into_parts();
    disconnect(connection).await;

    println!("✅ {}", result?);
    Ok(())
}

async fn handle_groups(cmd: GroupCommand, store: &RadDbStore) -> Result<(), Box<dyn Error>> {
    match cmd {
        GroupCommand::Add { code, title } => {
            let group = LocalGroup::new(code, title);
            store.create_group(&group).await?;
            println!("✅ Группа создана: {} ({})", group.code, group.title);
        }
        GroupCommand::Show { code } => match store.find_group(&code).await? {
            Some(group) => println!("{:#?}", group),
            None => eprintln!("❌ Группа не найдена: {code}"),
        },
    }
    Ok(())
}

async fn handle_records(json: bool, store: &RadDbStore) -> Result<(), Box<dyn Error>> {
    let records = store.records().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in records {
            println!(
                "{} | {} | {}",
                record.id,
                record.guid.as_deref().unwrap_or("-"),
                record.dn.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
