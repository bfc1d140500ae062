use redis::{aio::ConnectionManager, Client};
use tracing::info;

// ConnectionManager сам переподключается после обрыва соединения
#[derive(Clone)]
pub struct RedisClient {
    pub conn: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis connected");
        Ok(RedisClient { conn })
    }
}
