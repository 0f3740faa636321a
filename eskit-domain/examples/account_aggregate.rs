/// 账户聚合示例
/// 演示从命令执行到事件持久化、快照加速加载与历史版本重建的完整流程。
use anyhow::Result as AnyResult;
use eskit_domain::aggregate::Aggregate;
use eskit_domain::aggregate_root::AggregateRoot;
use eskit_domain::domain_event::EventContext;
use eskit_domain::entity::Entity;
use eskit_domain::error::DomainError;
use eskit_domain::event_upcaster::EventUpcasterChain;
use eskit_domain::persist::memory::{InMemoryEventRepository, InMemorySnapshotRepository};
use eskit_domain::persist::{AggregateRepository, SnapshotPolicy, SnapshottingRepository};
use eskit_domain::value_object::Version;
use eskit_macros::{entity, event};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// 领域模型定义
// ============================================================================

#[entity]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
    frozen: bool,
}

#[derive(Debug)]
enum AccountCommand {
    Open { owner: String, initial: i64 },
    Deposit { amount: i64 },
    Withdraw { amount: i64 },
    Freeze,
}

#[event(version = 1)]
enum AccountEvent {
    #[event(event_type = "account.opened")]
    Opened { owner: String, initial: i64 },
    #[event(event_type = "account.deposited")]
    Deposited { amount: i64 },
    #[event(event_type = "account.withdrawn")]
    Withdrawn { amount: i64 },
    #[event(event_type = "account.frozen")]
    Frozen,
}

impl Aggregate for Account {
    const TYPE: &'static str = "account";
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if self.frozen {
            return Err(DomainError::invalid_state("account is frozen"));
        }
        match command {
            AccountCommand::Open { owner, initial } => {
                if !self.owner.is_empty() {
                    return Err(DomainError::invalid_state("account already opened"));
                }
                if initial < 0 {
                    return Err(DomainError::invalid_command("initial must be >= 0"));
                }
                Ok(vec![AccountEvent::Opened { owner, initial }])
            }
            AccountCommand::Deposit { amount } => {
                if amount <= 0 {
                    return Err(DomainError::invalid_command("amount must be > 0"));
                }
                Ok(vec![AccountEvent::Deposited { amount }])
            }
            AccountCommand::Withdraw { amount } => {
                if amount <= 0 {
                    return Err(DomainError::invalid_command("amount must be > 0"));
                }
                if self.balance < amount {
                    return Err(DomainError::invalid_state("insufficient balance"));
                }
                Ok(vec![AccountEvent::Withdrawn { amount }])
            }
            AccountCommand::Freeze => Ok(vec![AccountEvent::Frozen]),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::Opened { owner, initial } => {
                self.owner = owner.clone();
                self.balance = *initial;
            }
            AccountEvent::Deposited { amount } => self.balance += *amount,
            AccountEvent::Withdrawn { amount } => self.balance -= *amount,
            AccountEvent::Frozen => self.frozen = true,
        }
    }
}

// ============================================================================
// 装配与演示
// ============================================================================

#[tokio::main]
async fn main() -> AnyResult<()> {
    let events = Arc::new(InMemoryEventRepository::new());
    let snapshots = Arc::new(InMemorySnapshotRepository::new());

    let repo = SnapshottingRepository::builder()
        .event_repo(Arc::clone(&events))
        .snapshot_repo(Arc::clone(&snapshots))
        .upcaster_chain(Arc::new(EventUpcasterChain::default()))
        .policy(SnapshotPolicy::Every(5))
        .build();
    let root: AggregateRoot<Account, _> = AggregateRoot::new(repo);

    let id = "acc-1".to_string();
    let ctx = EventContext::builder()
        .maybe_actor_type(Some("user".into()))
        .maybe_actor_id(Some("u-1".into()))
        .maybe_tenant_id(Some("t-1".into()))
        .build();

    // 开户并进行若干笔交易
    root.execute(
        &id,
        AccountCommand::Open {
            owner: "alice".into(),
            initial: 100,
        },
        ctx.clone(),
    )
    .await?;

    for _ in 0..6 {
        root.execute(&id, AccountCommand::Deposit { amount: 50 }, ctx.clone())
            .await?;
    }
    root.execute(&id, AccountCommand::Withdraw { amount: 120 }, ctx.clone())
        .await?;

    // 加载当前状态（版本 8 = 开户 + 6 次存款 + 1 次取款）
    let store = SnapshottingRepository::new(
        Arc::clone(&events),
        Arc::clone(&snapshots),
        Arc::new(EventUpcasterChain::default()),
    );
    let account: Account = store.load(&id).await?.expect("account should exist");
    println!(
        "current: owner={} balance={} {}",
        account.owner,
        account.balance,
        account.version()
    );

    // 历史版本重建：回看第 3 笔交易后的状态
    let past: Account = store
        .rebuild(&id, Version::from_value(3))
        .await?
        .expect("history should exist");
    println!("at v3:   balance={}", past.balance);

    // 冻结后命令被拒绝
    root.execute(&id, AccountCommand::Freeze, ctx.clone()).await?;
    let err = root
        .execute(&id, AccountCommand::Deposit { amount: 1 }, ctx)
        .await
        .unwrap_err();
    println!("frozen:  {err}");

    Ok(())
}
