//! relay - 開発用デモ
//!
//! InMemoryStore にデータを seed し、ビジネストランザクションで envelope を積んで、
//! dispatch loop と全 reconciliation loop を回します。終了時に RelayStatus を JSON で出力します。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::TimeDelta;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::domain::{
    AiQuota, DecisionExpired, DecisionId, DomainEvent, EventId, Milestone, MilestoneId,
    MilestoneMissed, OrganizationId, PendingDecision, ProjectId, ProjectUpdated, QuotaActivated,
    QuotaId, SprintCompleted, TaskCreated, TaskId,
};
use relay_core::impls::InMemoryStore;
use relay_core::ports::{Clock, OutboxWriter, SystemClock};
use relay_core::typed::EventHandler;
use relay_core::{RelayBuilder, RelayConfig, RelayDeps, RelayError, RelayStatus};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "relay", about = "Run the outbox relay against a seeded in-memory store")]
struct Cli {
    /// Stop after this many seconds (0 = until Ctrl-C).
    #[arg(long, default_value_t = 15)]
    run_for_secs: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Failures the notification handler returns before it starts succeeding.
    #[arg(long, default_value_t = 1)]
    flaky_failures: u32,

    /// Overrides every loop's poll interval (RELAY_* env vars apply otherwise).
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Overrides the backoff base delay.
    #[arg(long)]
    backoff_base_ms: Option<u64>,
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .init(),
    }
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = RelayConfig::from_env().context("reading RELAY_* environment")?;
    if let Some(ms) = cli.poll_interval_ms {
        let interval = Duration::from_millis(ms);
        config.dispatch.poll_interval = interval;
        config.milestone_expiry.poll_interval = interval;
        config.quota_activation.poll_interval = interval;
        config.decision_expiry.poll_interval = interval;
    }
    if let Some(ms) = cli.backoff_base_ms {
        config.dispatch.retry.base_delay = Duration::from_millis(ms);
    }
    Ok(config)
}

/// Read model の更新役（ここではログに出すだけ）
struct Projection;

macro_rules! log_projection {
    ($event:ty, $fmt:literal, $($field:ident),*) => {
        #[async_trait]
        impl EventHandler<$event> for Projection {
            fn name(&self) -> &str {
                "projection"
            }

            async fn handle(&self, event: &$event) -> Result<(), RelayError> {
                info!(event_id = %event.id, $($field = %event.$field,)* $fmt);
                Ok(())
            }
        }
    };
}

log_projection!(TaskCreated, "projection: task created", project_id, task_id, title);
log_projection!(ProjectUpdated, "projection: project updated", project_id, name);
log_projection!(SprintCompleted, "projection: sprint completed", sprint_id, completed_tasks);
log_projection!(MilestoneMissed, "projection: milestone missed", milestone_id, name);
log_projection!(QuotaActivated, "projection: quota activated", organization_id, quota_id);
log_projection!(DecisionExpired, "projection: decision expired", decision_id, project_id);

/// 最初の数回だけ失敗する通知役（リトライの様子を見るため）
struct FlakyNotifier {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl EventHandler<TaskCreated> for FlakyNotifier {
    fn name(&self) -> &str {
        "notifier"
    }

    async fn handle(&self, event: &TaskCreated) -> Result<(), RelayError> {
        let left = self.remaining_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(RelayError::handler(format!(
                "notification gateway unavailable (failures left={left})"
            )));
        }
        info!(task_id = %event.task_id, "notified assignees");
        Ok(())
    }
}

async fn seed(store: &InMemoryStore, clock: &dyn Clock) -> Result<ProjectId> {
    let now = clock.now();
    let project_id = ProjectId::random();
    let organization_id = OrganizationId::random();

    let mut current_quota = AiQuota::scheduled(
        QuotaId::random(),
        organization_id,
        100_000,
        now - TimeDelta::days(31),
    );
    current_quota.activate(now - TimeDelta::days(31), TimeDelta::days(30));
    let next_quota = AiQuota::scheduled(
        QuotaId::random(),
        organization_id,
        250_000,
        now - TimeDelta::minutes(1),
    );

    store
        .transaction(|tx| {
            tx.upsert_milestone(Milestone::new(
                MilestoneId::random(),
                project_id,
                "public beta",
                now - TimeDelta::days(2),
            ));
            tx.upsert_milestone(Milestone::new(
                MilestoneId::random(),
                project_id,
                "general availability",
                now + TimeDelta::days(30),
            ));
            tx.upsert_decision(PendingDecision::new(
                DecisionId::random(),
                project_id,
                "approve vendor contract",
                now - TimeDelta::hours(72),
            ));
            tx.upsert_quota(current_quota);
            tx.upsert_quota(next_quota);
            Ok(())
        })
        .await?;
    Ok(project_id)
}

/// 状態変更と envelope を同一コミットで積むビジネストランザクション
async fn create_task(store: &InMemoryStore, project_id: ProjectId, title: &str) -> Result<TaskId> {
    let task_id = TaskId::random();
    let title = title.to_string();
    store
        .transaction(|tx| {
            let occurred_on = tx.now();
            let created = DomainEvent::from(TaskCreated {
                id: EventId::random(),
                occurred_on,
                project_id,
                task_id,
                title,
            });
            tx.enqueue_envelope(
                created
                    .to_envelope()?
                    .with_idempotency_key(format!("task-created:{task_id}")),
            )?;
            let updated = ProjectUpdated {
                id: EventId::random(),
                occurred_on,
                project_id,
                name: "Apollo".to_string(),
            };
            tx.enqueue_event(&updated, None)?;
            Ok(task_id)
        })
        .await
        .map_err(Into::into)
}

async fn wait_for_stop(run_for: Option<Duration>) {
    let timer = async {
        match run_for {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for Ctrl-C");
            }
            info!("Ctrl-C received");
        }
        _ = timer => info!("run time elapsed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);
    let config = load_config(&cli)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryStore::new(clock.clone()));

    let relay = RelayBuilder::new(config)
        .register::<TaskCreated, _>(Projection)?
        .register::<TaskCreated, _>(FlakyNotifier {
            remaining_failures: AtomicU32::new(cli.flaky_failures),
        })?
        .register::<ProjectUpdated, _>(Projection)?
        .register::<SprintCompleted, _>(Projection)?
        .register::<MilestoneMissed, _>(Projection)?
        .register::<QuotaActivated, _>(Projection)?
        .register::<DecisionExpired, _>(Projection)?
        .expect_events(&DomainEvent::all_types())
        .build()?;

    let project_id = seed(&store, clock.as_ref()).await?;
    let task_id = create_task(&store, project_id, "write release notes").await?;
    info!(%project_id, %task_id, "business transaction committed");

    let deps = RelayDeps::in_memory(store.clone(), clock.clone());
    let loops = relay.start(&deps);

    let run_for = (cli.run_for_secs > 0).then(|| Duration::from_secs(cli.run_for_secs));
    wait_for_stop(run_for).await;
    loops.shutdown_and_join().await;

    let status = RelayStatus::collect(store.as_ref(), store.as_ref(), clock.now(), 10).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
