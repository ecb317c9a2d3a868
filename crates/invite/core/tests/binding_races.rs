use chrono::Utc;
use futures::future::join_all;
use invite_core::{
    BindingEngine, CodeStats, CodeStore, CodeType, InMemoryInviteStore, InviteError, Owner,
    StatsAggregator,
};
use std::sync::Arc;

async fn seeded(codes: &[(&str, CodeType)]) -> Arc<InMemoryInviteStore> {
    let store = Arc::new(InMemoryInviteStore::new());
    for (code, code_type) in codes {
        store
            .create_code(code, *code_type, Utc::now())
            .await
            .expect("seed code");
    }
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_binders_on_one_code_admit_exactly_one() {
    let store = seeded(&[("ABC12345", CodeType::Direct)]).await;
    let engine = BindingEngine::new(store.clone());

    let attempts = 32;
    let handles = (0..attempts).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .claim_presented("ABC12345", Owner::wallet(format!("0x{i:040x}")))
                .await
        })
    });

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(InviteError::AlreadyBound(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(lost, attempts - 1);

    let stored = store.find_by_code("ABC12345").await.unwrap().unwrap();
    assert!(stored.is_bound());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn one_identity_racing_for_two_codes_gets_one() {
    for _ in 0..20 {
        let store = seeded(&[
            ("AAAA0001", CodeType::Direct),
            ("AAAA0002", CodeType::Direct),
        ])
        .await;
        let engine = BindingEngine::new(store.clone());

        let handles = ["AAAA0001", "AAAA0002"].map(|code| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.claim_presented(code, Owner::wallet("0xSAME")).await })
        });
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("task panicked"))
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(InviteError::OwnerAlreadyBound(_)))));
        assert_eq!(store.count_unbound_by_type(CodeType::Direct).await.unwrap(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_claims_never_hand_out_a_code_twice() {
    let codes: Vec<String> = (0..10).map(|n| format!("TASK{n:04}")).collect();
    let store = Arc::new(InMemoryInviteStore::new());
    for code in &codes {
        store.create_code(code, CodeType::Task, Utc::now()).await.unwrap();
    }
    let engine = BindingEngine::new(store.clone());

    let handles = (0..25).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .bind(
                    invite_core::ClaimTarget::Pool(CodeType::Task),
                    Owner::wallet(format!("0x{i:x}")),
                )
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let mut won: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().ok().map(|receipt| receipt.code.clone()))
        .collect();
    won.sort();
    let before = won.len();
    won.dedup();
    assert_eq!(won.len(), before, "a code was handed out twice");
    assert!(won.len() <= 10);

    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(
                    err,
                    InviteError::AlreadyBound(_) | InviteError::InsufficientPool { .. }
                ),
                "unexpected failure {err}"
            );
        }
    }
}

#[tokio::test]
async fn task_stats_after_partial_binding() {
    let store = Arc::new(InMemoryInviteStore::new());
    let supply = invite_core::SupplyManager::new(store.clone());
    supply.top_up(CodeType::Task, 100).await.unwrap();

    let engine = BindingEngine::new(store.clone());
    for i in 0..7 {
        engine
            .bind(
                invite_core::ClaimTarget::Pool(CodeType::Task),
                Owner::wallet(format!("0xholder{i}")),
            )
            .await
            .unwrap();
    }

    let stats = StatsAggregator::new(store).stats(CodeType::Task).await.unwrap();
    assert_eq!(
        stats,
        CodeStats {
            total: 100,
            remaining: 93
        }
    );
}
