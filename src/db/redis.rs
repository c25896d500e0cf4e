use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::error::Error;

use super::{Database, Store};

/// Store backed by one Redis logical database. The underlying connection
/// manager reconnects on its own and is cheap to clone.
#[derive(Clone)]
pub struct RedisStore {
  connection: ConnectionManager,
  database: Database,
}

impl RedisStore {
  pub async fn new(
    host: &str,
    port: u16,
    database: Database,
  ) -> Result<Self, Error> {
    log::debug!(
      "Creating database connection host: {} port: {} database: {} ({})",
      host,
      port,
      database as u8,
      database.name()
    );

    let client = redis::Client::open(format!(
      "redis://{}:{}/{}",
      host, port, database as u8
    ))?;
    let connection = client.get_connection_manager().await?;

    Ok(RedisStore {
      connection,
      database,
    })
  }
}

#[async_trait]
impl Store for RedisStore {
  async fn get(&self, key: &str) -> Result<Option<String>, Error> {
    let mut connection = self.connection.clone();
    let value: Option<String> = redis::cmd("GET")
      .arg(key)
      .query_async(&mut connection)
      .await?;
    Ok(value)
  }

  async fn put(&self, key: &str, value: &str) -> Result<(), Error> {
    let mut connection = self.connection.clone();
    let _: () = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .query_async(&mut connection)
      .await?;
    Ok(())
  }

  async fn put_with_ttl(
    &self,
    key: &str,
    value: &str,
    ttl_seconds: u64,
  ) -> Result<(), Error> {
    let mut connection = self.connection.clone();
    let _: () = redis::cmd("SETEX")
      .arg(key)
      .arg(ttl_seconds)
      .arg(value)
      .query_async(&mut connection)
      .await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, Error> {
    let mut connection = self.connection.clone();
    let deleted: u64 = redis::cmd("DEL")
      .arg(key)
      .query_async(&mut connection)
      .await?;
    Ok(deleted > 0)
  }

  async fn get_and_delete(&self, key: &str) -> Result<Option<String>, Error> {
    let mut connection = self.connection.clone();
    let value: Option<String> = redis::cmd("GETDEL")
      .arg(key)
      .query_async(&mut connection)
      .await?;
    Ok(value)
  }

  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, Error> {
    if keys.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let values: Vec<Option<String>> = redis::cmd("MGET")
      .arg(keys)
      .query_async(&mut connection)
      .await?;
    Ok(values)
  }

  async fn mput(&self, entries: Vec<(String, String)>) -> Result<(), Error> {
    if entries.is_empty() {
      return Ok(());
    }
    let mut connection = self.connection.clone();
    let mut command = redis::cmd("MSET");
    for (key, value) in &entries {
      command.arg(key).arg(value);
    }
    let _: () = command.query_async(&mut connection).await?;
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>, Error> {
    let mut connection = self.connection.clone();
    let mut keys: Vec<String> = Vec::new();
    let mut cursor: u64 = 0;

    loop {
      let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
        .arg(cursor)
        .arg("COUNT")
        .arg(500)
        .query_async(&mut connection)
        .await?;
      keys.extend(batch);
      cursor = next_cursor;
      if cursor == 0 {
        break;
      }
    }

    keys.sort();
    keys.dedup();
    Ok(keys)
  }

  async fn exists(&self, key: &str) -> Result<bool, Error> {
    let mut connection = self.connection.clone();
    let exists: bool = redis::cmd("EXISTS")
      .arg(key)
      .query_async(&mut connection)
      .await?;
    Ok(exists)
  }
}
