//! RelayBuilder - handler 登録と全ループのワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//!
//! # Fail-fast 設計
//! - expect_events() で期待される event_type を登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」と設定の妥当性をチェック

use std::sync::Arc;

use tracing::info;

use super::dispatch_loop::OutboxDispatchLoop;
use super::group::LoopGroup;
use super::reconcile::{
    DecisionExpiry, MilestoneExpiry, QuotaActivationReconciler, ReconciliationLoop,
};
use crate::config::{ConfigError, RelayConfig};
use crate::impls::InMemoryStore;
use crate::ports::{
    Clock, DecisionStore, IdGenerator, MilestoneStore, OutboxStore, QuotaStore, UlidGenerator,
};
use crate::typed::{Event, EventHandler, EventRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing event types: {0:?}. These events were expected but have no handler.")]
    MissingEventTypes(Vec<String>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// RelayBuilder は Relay を構築
///
/// # 使用例
/// ```ignore
/// let relay = RelayBuilder::new(RelayConfig::from_env()?)
///     .register::<MilestoneMissed, _>(ProjectionUpdater)?
///     .expect_events(&[MilestoneMissed::TYPE])
///     .build()?;
///
/// let loops = relay.start(&RelayDeps::in_memory(store, clock));
/// ```
pub struct RelayBuilder {
    config: RelayConfig,
    registry: EventRegistry,
    expected_events: Vec<String>,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: EventRegistry::new(),
            expected_events: Vec::new(),
        }
    }

    pub fn register<E: Event, H: EventHandler<E> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<E, H>(handler)?;
        Ok(self)
    }

    pub fn register_shared<E: Event>(
        mut self,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Result<Self, RegistryError> {
        self.registry.register_shared::<E>(handler)?;
        Ok(self)
    }

    /// 呼ぶたびに追加される
    pub fn expect_events(mut self, event_types: &[&str]) -> Self {
        self.expected_events
            .extend(event_types.iter().map(|t| t.to_string()));
        self
    }

    pub fn build(self) -> Result<Relay, BuildError> {
        self.config.validate()?;

        let mut missing: Vec<String> = self
            .expected_events
            .iter()
            .filter(|t| !self.registry.is_registered(t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(BuildError::MissingEventTypes(missing));
        }

        Ok(Relay {
            config: self.config,
            registry: Arc::new(self.registry),
        })
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

/// Relay が動かすストア群
///
/// reconciliation 用のストアは任意。渡されたものだけループを起動します。
#[derive(Clone)]
pub struct RelayDeps {
    pub outbox: Arc<dyn OutboxStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub milestones: Option<Arc<dyn MilestoneStore>>,
    pub quotas: Option<Arc<dyn QuotaStore>>,
    pub decisions: Option<Arc<dyn DecisionStore>>,
}

impl RelayDeps {
    pub fn new(outbox: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            outbox,
            clock,
            ids,
            milestones: None,
            quotas: None,
            decisions: None,
        }
    }

    /// 1 つの InMemoryStore ですべてのループを動かす
    pub fn in_memory(store: Arc<InMemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(store.clone(), clock)
            .with_milestones(store.clone())
            .with_quotas(store.clone())
            .with_decisions(store)
    }

    pub fn with_milestones(mut self, store: Arc<dyn MilestoneStore>) -> Self {
        self.milestones = Some(store);
        self
    }

    pub fn with_quotas(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.quotas = Some(store);
        self
    }

    pub fn with_decisions(mut self, store: Arc<dyn DecisionStore>) -> Self {
        self.decisions = Some(store);
        self
    }
}

/// 検証済みの registry と設定
pub struct Relay {
    config: RelayConfig,
    registry: Arc<EventRegistry>,
}

impl Relay {
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn dispatch_loop(&self, deps: &RelayDeps) -> OutboxDispatchLoop {
        OutboxDispatchLoop::new(
            Arc::clone(&deps.outbox),
            Arc::clone(&self.registry),
            Arc::clone(&deps.clock),
            self.config.dispatch.clone(),
        )
    }

    /// Spawns the dispatch loop plus one reconciliation loop per provided store.
    /// Must be called inside a tokio runtime.
    pub fn start(&self, deps: &RelayDeps) -> LoopGroup {
        let mut group = LoopGroup::new();
        group.spawn(Arc::new(self.dispatch_loop(deps)));

        if let Some(store) = &deps.milestones {
            let reconciler = MilestoneExpiry::new(
                Arc::clone(store),
                Arc::clone(&deps.ids),
                self.config.milestone_expiry.clone(),
            );
            group.spawn(Arc::new(ReconciliationLoop::new(reconciler, Arc::clone(&deps.clock))));
        }
        if let Some(store) = &deps.quotas {
            let reconciler = QuotaActivationReconciler::new(
                Arc::clone(store),
                Arc::clone(&deps.ids),
                self.config.quota_activation.clone(),
            );
            group.spawn(Arc::new(ReconciliationLoop::new(reconciler, Arc::clone(&deps.clock))));
        }
        if let Some(store) = &deps.decisions {
            let reconciler = DecisionExpiry::new(
                Arc::clone(store),
                Arc::clone(&deps.ids),
                self.config.decision_expiry.clone(),
            );
            group.spawn(Arc::new(ReconciliationLoop::new(reconciler, Arc::clone(&deps.clock))));
        }

        info!(
            loops = ?group.loop_names(),
            event_types = ?self.registry.registered_types(),
            "relay started"
        );
        group
    }
}
