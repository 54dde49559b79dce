//! Deployable adscout node: configuration, the JetStream queue binding,
//! Postgres storage, provider sidecars, Telegram delivery, and the cron
//! schedules that drive dispatch.

pub mod config;
pub mod providers;
pub mod queue;
pub mod scheduled_tasks;
pub mod storage;
pub mod telegram;

pub use config::Config;
pub use providers::HttpProvider;
pub use queue::{JetStreamHeartbeat, JetStreamTransport};
pub use storage::PostgresStore;
pub use telegram::TelegramChannel;
