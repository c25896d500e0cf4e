use anyhow::Context;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use bos_rs::db::Stores;
use bos_rs::migrations;

/// Validates and repairs the stored entities before the operators start.
/// Meant to run to completion as a pre-start job.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let stdout = ConsoleAppender::builder()
    .encoder(Box::new(PatternEncoder::new(
      "{d(%Y-%m-%d %H:%M:%S)} - {h({l})} - {t} - {m}{n}",
    )))
    .build();
  let config = Config::builder()
    .appender(Appender::builder().build("stdout", Box::new(stdout)))
    .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
  log4rs::init_config(config)?;

  let db_host =
    std::env::var("DB_HOST").unwrap_or_else(|_| "cray-bos-db".to_string());
  let db_port: u16 = std::env::var("DB_PORT")
    .unwrap_or_else(|_| "6379".to_string())
    .parse()
    .context("DB_PORT must be an integer")?;

  let stores = Stores::redis(&db_host, db_port)
    .await
    .context("Failed to connect to the database")?;

  log::info!("Starting database migration");
  migrations::migrate(&stores)
    .await
    .context("Migration failed")?;
  log::info!("Database migration complete");

  Ok(())
}
