//! Serve command: run the live subscriber hub
//!
//! Binds the WebSocket listener, follows the execution log partition and
//! fans every appended record out to the connected dashboard sessions.
//! Runs until ctrl-c.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use std::time::Duration;
use tracing::info;

use crate::data_paths::DataPaths;
use crate::hub::{
    BroadcastHub, FollowTarget, HubConfig, HubServer, HubServerConfig, PartitionFollower,
};
use crate::store::{EventLogStore, PartitionKey};

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Port for the subscriber WebSocket listener
    #[arg(long, default_value_t = 3310)]
    pub port: u16,

    /// Seconds without a heartbeat before a subscriber is swept
    #[arg(long, default_value_t = 30)]
    pub heartbeat_secs: u64,

    /// Follow one fixed partition day (YYYYMMDD) instead of the current day
    #[arg(long)]
    pub date: Option<String>,

    /// Poll interval for the partition file, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_ms: u64,
}

pub struct ServeCommand {
    args: ServeArgs,
}

impl ServeCommand {
    pub fn new(args: ServeArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths) -> Result<()> {
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_timeout: Duration::from_secs(self.args.heartbeat_secs),
        });

        let server = HubServer::bind(
            HubServerConfig {
                port: self.args.port,
            },
            hub.clone(),
        )
        .await?;
        let addr = server.local_addr()?;
        let shutdown = server.shutdown_handle();

        let target = match &self.args.date {
            Some(date) => FollowTarget::Fixed(PartitionKey::parse(date)?),
            None => FollowTarget::Today,
        };
        let follower = PartitionFollower::new(
            EventLogStore::new(data_paths.executions()),
            hub.clone(),
            target,
            Duration::from_millis(self.args.poll_ms),
        );

        println!(
            "{} ws://{} (heartbeat timeout {}s)",
            "Subscriber hub listening on".bright_green(),
            addr,
            self.args.heartbeat_secs
        );
        println!(
            "Following execution log under {}",
            data_paths.executions().display()
        );
        println!("Press ctrl-c to stop");

        let follower_handle = tokio::spawn(follower.run(shutdown.subscribe()));
        let server_handle = tokio::spawn(server.run());

        tokio::signal::ctrl_c().await?;
        info!("Ctrl-c received, shutting down");
        let _ = shutdown.send(());

        server_handle.await??;
        follower_handle.await?;

        let stats = hub.stats().snapshot();
        println!();
        println!(
            "{} {} subscriber(s) served, {} message(s) delivered, {} delivery failure(s), {} swept",
            "Session stats:".bright_yellow(),
            stats.sessions_accepted,
            stats.messages_delivered,
            stats.delivery_failures,
            stats.sessions_swept
        );
        Ok(())
    }
}
