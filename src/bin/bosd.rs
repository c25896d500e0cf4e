use anyhow::Context;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use tokio_util::sync::CancellationToken;

use bos_rs::clients::{Clients, ServiceEndpoints};
use bos_rs::db::Stores;
use bos_rs::operators::cleanup::{
  ActualStateCleanupOperator, SessionCleanupOperator,
};
use bos_rs::operators::configuration::ConfiguringOperator;
use bos_rs::operators::power_off_forceful::PowerOffForcefulOperator;
use bos_rs::operators::power_off_graceful::PowerOffGracefulOperator;
use bos_rs::operators::power_on::PowerOnOperator;
use bos_rs::operators::session_completion::SessionCompletionOperator;
use bos_rs::operators::session_setup::SessionSetupOperator;
use bos_rs::operators::status::StatusOperator;
use bos_rs::operators::{run_operator_loop, Operator, OperatorContext};
use bos_rs::options::OptionsCache;

fn init_logging() -> anyhow::Result<()> {
  let level = match std::env::var("BOS_OPERATOR_LOG_LEVEL")
    .unwrap_or_else(|_| "INFO".to_string())
    .to_uppercase()
    .as_str()
  {
    "TRACE" => LevelFilter::Trace,
    "DEBUG" => LevelFilter::Debug,
    "INFO" => LevelFilter::Info,
    "WARN" | "WARNING" => LevelFilter::Warn,
    "ERROR" => LevelFilter::Error,
    other => {
      eprintln!("Log level {:?} is not valid. Falling back to INFO", other);
      LevelFilter::Info
    }
  };

  let stdout = ConsoleAppender::builder()
    .encoder(Box::new(PatternEncoder::new(
      "{d(%Y-%m-%d %H:%M:%S)} - {h({l})} - {t} - {m}{n}",
    )))
    .build();
  let config = Config::builder()
    .appender(Appender::builder().build("stdout", Box::new(stdout)))
    .build(Root::builder().appender("stdout").build(level))?;
  log4rs::init_config(config)?;
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_logging()?;

  let db_host =
    std::env::var("DB_HOST").unwrap_or_else(|_| "cray-bos-db".to_string());
  let db_port: u16 = std::env::var("DB_PORT")
    .unwrap_or_else(|_| "6379".to_string())
    .parse()
    .context("DB_PORT must be an integer")?;

  let stores = Stores::redis(&db_host, db_port)
    .await
    .context("Failed to connect to the database")?;

  let mut options = OptionsCache::new(stores.options.clone());
  if let Err(error) = options.update().await {
    log::warn!("Unable to load options, starting with defaults: {}", error);
  }

  let endpoints = ServiceEndpoints::from_env();
  let clients = Clients::new(&endpoints, options.data())
    .context("Failed to build service clients")?;
  let context = OperatorContext::new(stores, clients);

  let shutdown = CancellationToken::new();

  let operators: Vec<Box<dyn Operator>> = vec![
    Box::new(SessionSetupOperator::new(context.clone())),
    Box::new(StatusOperator::new(context.clone())),
    Box::new(PowerOnOperator::new(context.clone())),
    Box::new(PowerOffGracefulOperator::new(context.clone())),
    Box::new(PowerOffForcefulOperator::new(context.clone())),
    Box::new(ConfiguringOperator::new(context.clone())),
    Box::new(SessionCompletionOperator::new(context.clone())),
    Box::new(SessionCleanupOperator::new(context.clone())),
    Box::new(ActualStateCleanupOperator::new(context.clone())),
  ];

  let mut tasks = Vec::new();
  for operator in operators {
    tasks.push(tokio::spawn(run_operator_loop(
      operator,
      options.clone(),
      shutdown.clone(),
    )));
  }

  wait_for_shutdown().await;
  log::info!("Shutdown signal received, stopping operators");
  shutdown.cancel();
  futures::future::join_all(tasks).await;

  Ok(())
}

async fn wait_for_shutdown() {
  let ctrl_c = tokio::signal::ctrl_c();
  #[cfg(unix)]
  {
    let mut sigterm = match tokio::signal::unix::signal(
      tokio::signal::unix::SignalKind::terminate(),
    ) {
      Ok(sigterm) => sigterm,
      Err(error) => {
        log::error!("Unable to install SIGTERM handler: {}", error);
        let _ = ctrl_c.await;
        return;
      }
    };
    tokio::select! {
      _ = ctrl_c => {}
      _ = sigterm.recv() => {}
    }
  }
  #[cfg(not(unix))]
  {
    let _ = ctrl_c.await;
  }
}
